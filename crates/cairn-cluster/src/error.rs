//! Error types for the cluster runtime.

use thiserror::Error;

/// Errors surfaced by a [`crate::NodeHandle`].
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node's engine task is gone (shut down or panicked).
    #[error("node engine unavailable")]
    Unavailable,
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
