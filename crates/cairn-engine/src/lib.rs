//! The per-node state engine for Cairn.
//!
//! Every node, master or replica, runs one [`NodeState`]: the data
//! map (leased entries), the lock map (granted promises), the
//! trans-log buffer, and the current cluster view. The engine is the
//! serialization point of the node: its host processes one message at
//! a time in arrival order, which makes per-key locking inside a node
//! unnecessary.
//!
//! The engine is pure. It performs no I/O and never reads the clock;
//! every handler takes an explicit `now`. The surrounding actor shell
//! (in `cairn-cluster`) supplies the real clock and drives the sweep
//! cadence; tests supply fixed instants.

mod state;


pub use state::{DebugState, NodeState};
