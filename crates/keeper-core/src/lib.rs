//! Core utilities and types shared across all Keeper crates

pub mod error_builder;
pub mod plugin;
pub mod problemdetails;
pub mod throttle;
pub mod types;
pub mod validation;

pub use error_builder::*;
pub use problemdetails::ProblemDetails;
pub use throttle::Throttle;
pub use types::*;
pub use validation::{TimeBounds, ValidationError};

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
