use thiserror::Error;

/// Failures talking to a database cluster
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("request rejected by cluster: {0}")]
    Rejected(String),

    #[error("namespace \"{0}\" not found")]
    NamespaceNotFound(String),
}

impl ClusterError {
    /// Errors a caller may retry after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}
