//! The cluster messaging layer.
//!
//! The protocol is written against [`Transport`], not a concrete
//! network: a unicast request/reply with a per-call budget and a
//! fire-and-forget cast. Unreachability and per-call timeouts both
//! surface as [`TransportError`]; the coordinator folds either into
//! its Down count, so a slow node and a dead node are
//! indistinguishable to quorum accounting, as intended.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cairn_types::NodeId;
use cairn_wire::{Push, Reply, Request};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::node::EngineCall;

/// Transport-level failures. Never carries protocol outcomes; those
/// are tagged [`Reply`] variants.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination is not reachable.
    #[error("{0} unreachable")]
    Unreachable(NodeId),

    /// No reply arrived within the call budget.
    #[error("request to {0} timed out after {1:?}")]
    Timeout(NodeId, Duration),
}

/// Abstract cluster messaging.
///
/// Implementations must be cheaply cloneable behind an `Arc`; the
/// coordinator fans one call out per destination concurrently.
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` to `dest` and waits at most `budget` for the
    /// reply.
    fn call(
        &self,
        dest: NodeId,
        request: Request,
        budget: Duration,
    ) -> impl Future<Output = Result<Reply, TransportError>> + Send;

    /// Sends an asynchronous push to `dest`. Fire-and-forget:
    /// delivery failures are swallowed.
    fn cast(&self, dest: NodeId, push: Push) -> impl Future<Output = ()> + Send;
}

/// In-process transport: routes messages straight into node inboxes.
///
/// Individual nodes can be severed to simulate a partition; a
/// severed node is unreachable for calls and silently dropped for
/// casts until healed.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: RwLock<HashMap<NodeId, mpsc::Sender<EngineCall>>>,
    severed: RwLock<HashSet<NodeId>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node's inbox under its id.
    pub fn register(&self, node: NodeId, inbox: mpsc::Sender<EngineCall>) {
        self.inner
            .nodes
            .write()
            .expect("transport registry poisoned")
            .insert(node, inbox);
    }

    /// Cuts the node off: calls fail as unreachable, casts are
    /// dropped.
    pub fn sever(&self, node: NodeId) {
        tracing::info!(node = %node, "severing node from the transport");
        self.inner
            .severed
            .write()
            .expect("transport registry poisoned")
            .insert(node);
    }

    /// Restores a previously severed node.
    pub fn heal(&self, node: NodeId) {
        tracing::info!(node = %node, "healing node");
        self.inner
            .severed
            .write()
            .expect("transport registry poisoned")
            .remove(&node);
    }

    fn route(&self, dest: NodeId) -> Option<mpsc::Sender<EngineCall>> {
        if self
            .inner
            .severed
            .read()
            .expect("transport registry poisoned")
            .contains(&dest)
        {
            return None;
        }
        self.inner
            .nodes
            .read()
            .expect("transport registry poisoned")
            .get(&dest)
            .cloned()
    }
}

impl Transport for InMemoryTransport {
    async fn call(
        &self,
        dest: NodeId,
        request: Request,
        budget: Duration,
    ) -> Result<Reply, TransportError> {
        let Some(inbox) = self.route(dest) else {
            return Err(TransportError::Unreachable(dest));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        inbox
            .send(EngineCall::Request {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::Unreachable(dest))?;

        match tokio::time::timeout(budget, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Engine dropped the reply channel: the node died mid-call.
            Ok(Err(_)) => Err(TransportError::Unreachable(dest)),
            Err(_) => Err(TransportError::Timeout(dest, budget)),
        }
    }

    async fn cast(&self, dest: NodeId, push: Push) {
        let Some(inbox) = self.route(dest) else {
            tracing::debug!(dest = %dest, "cast dropped, destination unreachable");
            return;
        };
        let _ = inbox.send(EngineCall::Push(push)).await;
    }
}
