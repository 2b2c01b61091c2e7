//! The client-facing write coordinator for Cairn.
//!
//! A coordinator is stateless between operations and runs in the
//! caller's task. Per operation it generates a fresh [`cairn_types::Tag`],
//! snapshots `(masters, w)` from the cluster view once, and drives
//! the two-phase protocol over the cluster messaging layer:
//!
//! 1. **Promise** - fan-out to every master, tallying granted,
//!    rejected, and down nodes; resolved early once the quorum is
//!    mathematically out of reach.
//! 2. **Commit** - on quorum, a blind commit to every master (also
//!    the ones that never saw the promise; the proven quorum makes
//!    that safe and brings stragglers to a consistent state).
//!
//! Failing quorum always ends in a best-effort abort fan-out and a
//! single client-visible [`NoQuorum`](CoordinatorError::NoQuorum).
//!
//! Dirty reads never involve a coordinator: they are local,
//! non-quorum reads served by the node handle
//! ([`cairn_cluster::NodeHandle::dirty_read`]).

mod admin;
mod coordinator;
mod error;

pub use admin::{lag, set_nodes, set_w, summaries};
pub use coordinator::{Coordinator, QuorumOutcome};
pub use error::CoordinatorError;
