use keeper_config::EncryptionPolicy;
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Resolve the key material named by an encryption policy and derive the
/// 32-byte cipher key from it.
pub async fn resolve_key(policy: &EncryptionPolicy) -> Result<[u8; 32], StorageError> {
    let material = if let Some(path) = &policy.key_file {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::Key(format!("cannot read key file {}: {}", path, e)))?
    } else if let Some(var) = &policy.key_env {
        std::env::var(var)
            .map_err(|_| StorageError::Key(format!("environment variable {} is not set", var)))?
    } else if let Some(secret) = &policy.key_secret {
        return Err(StorageError::Key(format!(
            "secret agent key \"{}\" cannot be resolved: no secret agent configured",
            secret
        )));
    } else {
        return Err(StorageError::Key("no key source configured".to_string()));
    };

    let material = material.trim();
    if material.is_empty() {
        return Err(StorageError::Key("key material is empty".to_string()));
    }
    Ok(derive_key(material.as_bytes()))
}

pub fn derive_key(material: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest(material));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_key_file_and_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "correct horse").unwrap();
        let policy = EncryptionPolicy {
            mode: "AES256".into(),
            key_file: Some(file.path().display().to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_key(&policy).await.unwrap(), derive_key(b"correct horse"));

        let policy = EncryptionPolicy {
            mode: "AES256".into(),
            key_env: Some("KEEPER_TEST_KEY_THAT_IS_NOT_SET".into()),
            ..Default::default()
        };
        assert!(matches!(resolve_key(&policy).await, Err(StorageError::Key(_))));
    }

    #[tokio::test]
    async fn test_secret_agent_is_unresolvable() {
        let policy = EncryptionPolicy {
            mode: "AES128".into(),
            key_secret: Some("backup-key".into()),
            ..Default::default()
        };
        let err = resolve_key(&policy).await.unwrap_err();
        assert!(err.to_string().contains("secret agent"));
    }
}
