//! Error types for meshguard

use thiserror::Error;

/// Meshguard error type
#[derive(Error, Debug)]
pub enum MeshError {
    /// Transport connect/disconnect failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Liveness probe failure (transport-level)
    #[error("probe error: {0}")]
    Probe(String),

    /// Remediation command failure
    #[error("remediation error: {0}")]
    Remediation(String),

    /// Notification channel failure
    #[error("notification error: {0}")]
    Notification(String),

    /// Gossip transport failure
    #[error("gossip error: {0}")]
    Gossip(String),

    /// Operation exceeded its deadline
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error
    #[error("config error: {0}")]
    ConfigError(String),
}

/// Result type for meshguard
pub type MeshResult<T> = Result<T, MeshError>;
