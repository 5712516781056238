//! Error types for stream operations

use std::sync::Arc;

/// Error type for stream, buffer and binding operations
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A chunk failed the validity check before insertion
    #[error("invalid chunk type: {kind}")]
    InvalidChunkType { kind: &'static str },

    /// An argument arrived with the wrong shape at a dynamic entry point
    #[error("invalid argument type: expected {expected}, got {found}")]
    InvalidArgumentType {
        expected: &'static str,
        found: String,
    },

    /// The event source refused to register a trigger
    #[error("event source rejected `{event}`: {reason}")]
    Source { event: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fault carried by the `error` signal.
///
/// Destinations report arbitrary errors, so the payload is type-erased and
/// shared between every handler that observes it.
pub type Fault = Arc<dyn std::error::Error + Send + Sync>;

/// Wrap any error into a [`Fault`]
pub fn fault<E>(err: E) -> Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}
