//! Shipping links to source clusters, continuous backup configuration and
//! system metadata snapshots.

pub mod error;
pub mod handlers;
pub mod plugin;
pub mod service;
pub mod smd;

pub use error::ConnectError;
pub use plugin::ConnectPlugin;
pub use service::ConnectionService;
pub use smd::{SmdService, SmdSnapshot, SmdState};
