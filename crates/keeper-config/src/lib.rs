//! Configuration graph, validation and the durable store that serves it

pub mod error;
pub mod handlers;
pub mod model;
pub mod plugin;
pub mod server;
pub mod store;
pub mod validate;

pub use error::ConfigError;
pub use model::*;
pub use plugin::ConfigPlugin;
pub use server::{ConfigFile, QueueSettings, ServerConfig, ServiceSettings};
pub use store::ConfigStore;
pub use validate::{
    parse_cron, parse_partition_list, validate_cluster, validate_compression, validate_config,
    validate_connection, validate_encryption, validate_storage, PartitionRange, PARTITION_COUNT,
};
