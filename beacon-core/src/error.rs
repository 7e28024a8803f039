//! Error types for the registry core

use thiserror::Error;

use crate::models::InstanceId;

/// Registry error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceId),

    #[error("Eviction queue already has an active subscriber")]
    AlreadySubscribed,

    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;
