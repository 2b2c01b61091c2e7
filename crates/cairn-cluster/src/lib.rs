//! Cluster runtime for Cairn.
//!
//! This crate is the shell around the pure state engine:
//! - [`Transport`] - the abstract cluster messaging layer: unicast
//!   request/reply with a per-call budget, fire-and-forget casts, and
//!   unreachability surfaced as [`TransportError`]
//! - [`InMemoryTransport`] - in-process transport with per-node
//!   severing, used by the local harness and the scenario tests
//! - [`Node`] / [`NodeHandle`] - the per-node actor: a bounded inbox
//!   serializing every state mutation, the two expiration sweep
//!   tickers, and (on masters) the replication pump
//! - [`LocalCluster`] - spawns a full cluster over one in-memory
//!   transport
//!
//! Process supervision is out of scope: a node that hits a fatal
//! condition panics and is expected to be restarted by its
//! supervisor.

mod error;
mod local;
mod node;
mod transport;

pub use error::{NodeError, Result};
pub use local::LocalCluster;
pub use node::{EngineCall, Node, NodeHandle};
pub use transport::{InMemoryTransport, Transport, TransportError};
