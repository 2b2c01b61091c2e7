//! Coordinator error types.

use thiserror::Error;

/// The single client-visible failure of a quorum operation.
///
/// Per-node outcomes (rejections, unreachable nodes, timeouts) are
/// folded into the vote count; they never escape individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// Fewer masters promised than the configured write quorum. A
    /// best-effort abort has already been fanned out.
    #[error("no quorum: {voted} of {needed} required promises")]
    NoQuorum { needed: usize, voted: usize },
}
