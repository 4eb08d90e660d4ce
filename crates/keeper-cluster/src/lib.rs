//! Access to database clusters: scans, writes and cluster metadata

pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod record;

pub use client::{ClusterClient, ClusterConnector, ClusterResult};
pub use error::ClusterError;
pub use gateway::GatewayConnector;
pub use memory::{MemoryCluster, MemoryConnector};
pub use record::*;
