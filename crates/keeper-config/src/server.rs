//! Process level settings: CLI/env values plus the `service` section of the
//! optional YAML configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{Config, Storage};

pub const SQLITE_DB_NAME: &str = "keeper.db";
pub const CONTINUOUS_DIR_NAME: &str = "continuous";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub database_url: String,
    pub data_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    /// Bearer token required on every API call when set
    pub api_token: Option<String>,
    /// Shipping topology fixed at deploy time; connections are read-only
    pub static_xdr: bool,
    pub service: ServiceSettings,
}

impl ServerConfig {
    pub fn new(
        address: String,
        database_url: Option<String>,
        data_dir: Option<PathBuf>,
        config_file: Option<PathBuf>,
        api_token: Option<String>,
        static_xdr: bool,
    ) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| PathBuf::from("keeper-data"));
        std::fs::create_dir_all(&data_dir)?;

        let database_url = database_url.unwrap_or_else(|| {
            format!(
                "sqlite://{}?mode=rwc",
                data_dir.join(SQLITE_DB_NAME).display()
            )
        });

        let service = match &config_file {
            Some(path) => ConfigFile::load(path)?.service,
            None => ServiceSettings::default(),
        };

        Ok(Self {
            address,
            database_url,
            data_dir,
            config_file,
            api_token: api_token.filter(|t| !t.is_empty()),
            static_xdr,
            service,
        })
    }

    /// Storage receiving committed continuous-backup batches.
    pub fn continuous_storage(&self) -> Storage {
        self.service.continuous_storage.clone().unwrap_or_else(|| {
            Storage::local(self.data_dir.join(CONTINUOUS_DIR_NAME).display().to_string())
        })
    }
}

/// Layout of the YAML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(flatten)]
    pub config: Config,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceSettings {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_storage: Option<Storage>,
    /// Concurrent backup runs across all routines
    #[serde(default = "default_max_concurrent_backups")]
    pub max_concurrent_backups: usize,
}

fn default_max_concurrent_backups() -> usize {
    4
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpSettings {
    #[serde(default)]
    pub rate: RateSettings,
}

/// Request rate limit: `tps` requests per second with a burst of `size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateSettings {
    pub tps: u64,
    pub size: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            tps: 1024,
            size: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueSettings {
    pub pulling_interval_ms: u64,
    pub batch_size: u64,
    pub max_attempts: i32,
    /// Age after which an IN_PROGRESS record counts as a zombie
    pub zombie_recover_interval_ms: u64,
    pub zombie_check_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            pulling_interval_ms: 500,
            batch_size: 1000,
            max_attempts: 5,
            zombie_recover_interval_ms: 60_000,
            zombie_check_interval_ms: 10_000,
        }
    }
}
