//! Error types for peer replication

use thiserror::Error;

/// Replication error types
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Replication link closed")]
    LinkClosed,
}

/// Result type for replication operations
pub type Result<T> = std::result::Result<T, ClusterError>;
