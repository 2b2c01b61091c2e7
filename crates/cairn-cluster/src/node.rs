//! The per-node actor: engine task, sweep tickers, replication pump.

use std::sync::Arc;

use cairn_engine::{DebugState, NodeState};
use cairn_types::{ClusterView, Key, NodeId, NodeSummary, Role, Timestamp, Value};
use cairn_wire::{Push, Reply, Request};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use cairn_config::TimingSection;

use crate::error::{NodeError, Result};
use crate::transport::Transport;

/// Capacity of the engine inbox. Backpressure applies to callers
/// beyond this depth.
const INBOX_CAPACITY: usize = 1024;

/// One message into the engine task. The inbox is the node's
/// serialization point: messages are processed one at a time in
/// arrival order, so no two handlers ever interleave.
#[derive(Debug)]
pub enum EngineCall {
    /// A protocol request expecting a reply.
    Request {
        request: Request,
        reply: oneshot::Sender<Reply>,
    },
    /// An asynchronous push; no reply is ever sent.
    Push(Push),
    /// Local non-quorum read.
    DirtyRead {
        key: Key,
        reply: oneshot::Sender<Option<Value>>,
    },
    /// Take the trans-log buffer for a push tick.
    DrainLog {
        reply: oneshot::Sender<Vec<cairn_types::TransLogRecord>>,
    },
    /// Run one lease-expiration sweep.
    SweepLeases,
    /// Run one lock-expiration sweep.
    SweepLocks,
    /// Snapshot the mutable tables.
    DebugState { reply: oneshot::Sender<DebugState> },
}

/// Spawns node tasks. See [`NodeHandle`] for the resulting API.
pub struct Node;

impl Node {
    /// Spawns the engine task, both sweep tickers, and, for masters,
    /// the replication pump. The caller registers the returned
    /// handle's inbox with its transport.
    pub fn spawn<T: Transport>(
        node_id: NodeId,
        role: Role,
        seed_view: ClusterView,
        timing: &TimingSection,
        transport: Arc<T>,
    ) -> NodeHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (view_tx, view_rx) = watch::channel(seed_view.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = NodeState::new(node_id, seed_view, timing.lock_ttl_ms);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(engine_task(
            state,
            inbox_rx,
            view_tx,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(sweep_task(
            inbox_tx.clone(),
            timing.lease_sweep_interval(),
            || EngineCall::SweepLeases,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(sweep_task(
            inbox_tx.clone(),
            timing.lock_sweep_interval(),
            || EngineCall::SweepLocks,
            shutdown_rx.clone(),
        )));

        if role == Role::Master {
            tasks.push(tokio::spawn(pump_task(
                node_id,
                inbox_tx.clone(),
                view_rx.clone(),
                timing.push_interval(),
                transport,
                shutdown_rx,
            )));
        }

        tracing::info!(node = %node_id, ?role, "node started");

        NodeHandle {
            node_id,
            role,
            inbox: inbox_tx,
            view: view_rx,
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Handle to a running node.
pub struct NodeHandle {
    node_id: NodeId,
    role: Role,
    inbox: mpsc::Sender<EngineCall>,
    view: watch::Receiver<ClusterView>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The inbox sender, for transport registration.
    pub fn inbox(&self) -> mpsc::Sender<EngineCall> {
        self.inbox.clone()
    }

    /// The current membership snapshot as this node sees it.
    pub fn view(&self) -> ClusterView {
        self.view.borrow().clone()
    }

    /// A watch receiver over this node's membership snapshot. Each
    /// borrow is snapshot-consistent; the engine task is the sole
    /// writer.
    pub fn view_watch(&self) -> watch::Receiver<ClusterView> {
        self.view.clone()
    }

    /// Submits a request to the local engine, bypassing the
    /// transport.
    pub async fn request(&self, request: Request) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send(EngineCall::Request {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NodeError::Unavailable)?;
        reply_rx.await.map_err(|_| NodeError::Unavailable)
    }

    /// Dirty read: local snapshot only, no quorum. May return a
    /// stale or expired-but-not-swept value.
    pub async fn dirty_read(&self, key: Key) -> Result<Option<Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send(EngineCall::DirtyRead {
                key,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NodeError::Unavailable)?;
        reply_rx.await.map_err(|_| NodeError::Unavailable)
    }

    /// Local counters.
    pub async fn summary(&self) -> Result<NodeSummary> {
        match self.request(Request::Summary).await? {
            Reply::Summary(summary) => Ok(summary),
            _ => Err(NodeError::Unavailable),
        }
    }

    /// Snapshot of the mutable tables, for tests and observability.
    pub async fn debug_state(&self) -> Result<DebugState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send(EngineCall::DebugState { reply: reply_tx })
            .await
            .map_err(|_| NodeError::Unavailable)?;
        reply_rx.await.map_err(|_| NodeError::Unavailable)
    }

    /// Stops the tickers and the engine task, then waits for them.
    /// All state is dropped with the engine.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!(node = %self.node_id, "node stopped");
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// The single-writer engine loop. Every mutation of the node's maps
/// happens here, one message at a time.
async fn engine_task(
    mut state: NodeState,
    mut inbox: mpsc::Receiver<EngineCall>,
    view_tx: watch::Sender<ClusterView>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let call = tokio::select! {
            call = inbox.recv() => match call {
                Some(call) => call,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        match call {
            EngineCall::Request { request, reply } => {
                let is_admin = matches!(
                    request,
                    Request::SetMasters { .. } | Request::SetReplicas { .. } | Request::SetQuorum { .. }
                );
                let outcome = state.handle(request, Timestamp::now());
                if is_admin {
                    let _ = view_tx.send(state.view().clone());
                }
                let _ = reply.send(outcome);
            }
            EngineCall::Push(Push::ApplyLog { origin, records }) => {
                state.on_apply_log(origin, records, Timestamp::now());
            }
            EngineCall::DirtyRead { key, reply } => {
                let _ = reply.send(state.dirty_read(&key));
            }
            EngineCall::DrainLog { reply } => {
                let _ = reply.send(state.drain_translog());
            }
            EngineCall::SweepLeases => {
                state.sweep_leases(Timestamp::now());
            }
            EngineCall::SweepLocks => {
                state.sweep_locks(Timestamp::now());
            }
            EngineCall::DebugState { reply } => {
                let _ = reply.send(state.debug_state());
            }
        }
    }
}

/// Periodic sweep driver. Ticks are coalesced if the engine falls
/// behind.
async fn sweep_task(
    inbox: mpsc::Sender<EngineCall>,
    period: std::time::Duration,
    make_call: fn() -> EngineCall,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inbox.send(make_call()).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// The replication pump, masters only: every tick, take the
/// accumulated trans-log and broadcast it fire-and-forget to every
/// replica in the current view.
async fn pump_task<T: Transport>(
    node_id: NodeId,
    inbox: mpsc::Sender<EngineCall>,
    view: watch::Receiver<ClusterView>,
    period: std::time::Duration,
    transport: Arc<T>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if inbox.send(EngineCall::DrainLog { reply: reply_tx }).await.is_err() {
                    break;
                }
                let Ok(records) = reply_rx.await else { break };
                if records.is_empty() {
                    continue;
                }

                let replicas = view.borrow().replicas.clone();
                tracing::debug!(
                    node = %node_id,
                    records = records.len(),
                    replicas = replicas.len(),
                    "pushing trans-log"
                );
                for replica in replicas {
                    transport
                        .cast(
                            replica,
                            Push::ApplyLog {
                                origin: node_id,
                                records: records.clone(),
                            },
                        )
                        .await;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
