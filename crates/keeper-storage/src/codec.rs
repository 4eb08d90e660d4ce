//! Artifact framing.
//!
//! An artifact is a `KPR1 {json header}` line followed by the body. The body
//! is JSON lines, gzip compressed when the header says so, then sealed with
//! AES-GCM (a random 12 byte nonce followed by the ciphertext).

use std::io::{Read, Write};

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes128Gcm, Aes256Gcm, Nonce};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use keeper_config::{CompressionMode, CompressionPolicy, EncryptionMode, EncryptionPolicy};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::keys::resolve_key;

pub const MAGIC: &str = "KPR1";
const NONCE_LENGTH: usize = 12;
const DEFAULT_GZIP_LEVEL: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArtifactHeader {
    pub compression: CompressionMode,
    pub encryption: EncryptionMode,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub record_count: u64,
    /// Epoch milliseconds
    #[serde(default)]
    pub created: i64,
}

/// Compression and encryption applied when writing, or expected when
/// reading, artifacts.
#[derive(Clone)]
pub struct CodecOptions {
    pub compression: CompressionMode,
    pub level: u32,
    pub encryption: EncryptionMode,
    key: Option<[u8; 32]>,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self::plain()
    }
}

impl std::fmt::Debug for CodecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecOptions")
            .field("compression", &self.compression)
            .field("level", &self.level)
            .field("encryption", &self.encryption)
            .finish_non_exhaustive()
    }
}

impl CodecOptions {
    pub fn plain() -> Self {
        Self {
            compression: CompressionMode::None,
            level: DEFAULT_GZIP_LEVEL,
            encryption: EncryptionMode::None,
            key: None,
        }
    }

    pub fn with_key(mut self, encryption: EncryptionMode, key: [u8; 32]) -> Self {
        self.encryption = encryption;
        self.key = Some(key);
        self
    }

    pub fn with_compression(mut self, compression: CompressionMode, level: u32) -> Self {
        self.compression = compression;
        self.level = level;
        self
    }

    /// Build options from policies, resolving the encryption key.
    pub async fn from_policies(
        compression: Option<&CompressionPolicy>,
        encryption: Option<&EncryptionPolicy>,
    ) -> Result<Self, StorageError> {
        let mut options = Self::plain();

        if let Some(policy) = compression {
            options.compression = policy.mode.parse().map_err(|_| {
                StorageError::Configuration(format!("invalid compression mode {}", policy.mode))
            })?;
            if let Some(level) = policy.level {
                options.level = level.clamp(0, 9) as u32;
            }
        }

        if let Some(policy) = encryption {
            let mode: EncryptionMode = policy.mode.parse().map_err(|_| {
                StorageError::Configuration(format!("invalid encryption mode {}", policy.mode))
            })?;
            if mode != EncryptionMode::None {
                let key = resolve_key(policy).await?;
                options = options.with_key(mode, key);
            }
        }

        Ok(options)
    }

    pub fn encode(&self, header: &ArtifactHeader, body: &[u8]) -> Result<Bytes, StorageError> {
        let header = ArtifactHeader {
            compression: self.compression,
            encryption: self.encryption,
            ..header.clone()
        };

        let mut payload = match self.compression {
            CompressionMode::None => body.to_vec(),
            CompressionMode::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
                encoder.write_all(body)?;
                encoder.finish()?
            }
        };

        if self.encryption != EncryptionMode::None {
            payload = self.seal(&payload)?;
        }

        let header_json = serde_json::to_string(&header)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        let mut out = Vec::with_capacity(MAGIC.len() + header_json.len() + 2 + payload.len());
        out.extend_from_slice(MAGIC.as_bytes());
        out.push(b' ');
        out.extend_from_slice(header_json.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&payload);
        Ok(Bytes::from(out))
    }

    /// Parse only the header line.
    pub fn header(data: &[u8]) -> Result<(ArtifactHeader, usize), StorageError> {
        let newline = data
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StorageError::Codec("missing header line".to_string()))?;
        let line = std::str::from_utf8(&data[..newline])
            .map_err(|_| StorageError::Codec("header is not UTF-8".to_string()))?;
        let json = line
            .strip_prefix(MAGIC)
            .map(str::trim_start)
            .ok_or_else(|| StorageError::Codec("unknown artifact format".to_string()))?;
        let header = serde_json::from_str(json).map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok((header, newline + 1))
    }

    /// Decode an artifact. Fails when the artifact was written with a
    /// compression or encryption mode these options do not specify.
    pub fn decode(&self, data: &[u8]) -> Result<(ArtifactHeader, Vec<u8>), StorageError> {
        let (header, offset) = Self::header(data)?;

        if header.encryption != EncryptionMode::None && header.encryption != self.encryption {
            return Err(StorageError::PolicyMismatch(format!(
                "backup is encrypted with {} but the restore policy specifies {}",
                header.encryption, self.encryption
            )));
        }
        if header.compression != CompressionMode::None && header.compression != self.compression {
            return Err(StorageError::PolicyMismatch(format!(
                "backup is compressed with {} but the restore policy specifies {}",
                header.compression, self.compression
            )));
        }

        let mut payload = data[offset..].to_vec();
        if header.encryption != EncryptionMode::None {
            payload = self.open(&payload)?;
        }

        let body = match header.compression {
            CompressionMode::None => payload,
            CompressionMode::Gzip => {
                let mut decoded = Vec::new();
                GzDecoder::new(payload.as_slice())
                    .read_to_end(&mut decoded)
                    .map_err(|e| StorageError::Codec(format!("corrupt compressed body: {}", e)))?;
                decoded
            }
        };

        Ok((header, body))
    }

    fn key(&self) -> Result<&[u8; 32], StorageError> {
        self.key
            .as_ref()
            .ok_or_else(|| StorageError::Key("no encryption key resolved".to_string()))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let key = self.key()?;
        let (nonce, ciphertext) = match self.encryption {
            EncryptionMode::Aes128 => {
                let cipher = Aes128Gcm::new_from_slice(&key[..16]).map_err(invalid_key)?;
                let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
                (nonce, cipher.encrypt(&nonce, plaintext))
            }
            _ => {
                let cipher = Aes256Gcm::new(&(*key).into());
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                (nonce, cipher.encrypt(&nonce, plaintext))
            }
        };
        let ciphertext = ciphertext.map_err(|e| StorageError::Key(format!("encryption failed: {}", e)))?;

        let mut sealed = nonce.to_vec();
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StorageError> {
        let key = self.key()?;
        if sealed.len() < NONCE_LENGTH {
            return Err(StorageError::Codec("encrypted body is truncated".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let nonce: [u8; NONCE_LENGTH] = nonce
            .try_into()
            .map_err(|_| StorageError::Codec("encrypted body is truncated".to_string()))?;
        let nonce = Nonce::<U12>::from(nonce);
        let plaintext = match self.encryption {
            EncryptionMode::Aes128 => Aes128Gcm::new_from_slice(&key[..16])
                .map_err(invalid_key)?
                .decrypt(&nonce, ciphertext),
            _ => Aes256Gcm::new(&(*key).into()).decrypt(&nonce, ciphertext),
        };
        plaintext.map_err(|_| StorageError::Key("decryption failed: wrong key".to_string()))
    }
}

fn invalid_key(e: impl std::fmt::Display) -> StorageError {
    StorageError::Key(format!("invalid encryption key: {}", e))
}
