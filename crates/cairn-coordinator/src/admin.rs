//! Operator-facing cluster administration and probes.
//!
//! Reconfiguration is intentionally best-effort broadcast: each node
//! is told individually, unreachable nodes are skipped, and there is
//! no cross-node agreement step. Operators are expected to quiesce
//! writes while reconfiguring.

use std::time::Duration;

use cairn_cluster::Transport;
use cairn_types::{NodeId, NodeSummary};
use cairn_wire::{Reply, Request};
use tokio::time::Instant;

/// Replaces the master and replica sets on every node of `cluster`.
/// Returns the nodes that acknowledged both updates.
pub async fn set_nodes<T: Transport>(
    transport: &T,
    cluster: &[NodeId],
    masters: Vec<NodeId>,
    replicas: Vec<NodeId>,
    budget: Duration,
) -> Vec<NodeId> {
    let mut acknowledged = Vec::with_capacity(cluster.len());
    for &node in cluster {
        let set_masters = Request::SetMasters {
            masters: masters.clone(),
        };
        let set_replicas = Request::SetReplicas {
            replicas: replicas.clone(),
        };
        let ok = matches!(transport.call(node, set_masters, budget).await, Ok(Reply::AdminOk))
            && matches!(
                transport.call(node, set_replicas, budget).await,
                Ok(Reply::AdminOk)
            );
        if ok {
            acknowledged.push(node);
        } else {
            tracing::warn!(node = %node, "node missed membership broadcast");
        }
    }
    acknowledged
}

/// Replaces the write-quorum threshold on every node of `cluster`.
/// Returns the nodes that acknowledged.
pub async fn set_w<T: Transport>(
    transport: &T,
    cluster: &[NodeId],
    w: usize,
    budget: Duration,
) -> Vec<NodeId> {
    let mut acknowledged = Vec::with_capacity(cluster.len());
    for &node in cluster {
        match transport.call(node, Request::SetQuorum { w }, budget).await {
            Ok(Reply::AdminOk) => acknowledged.push(node),
            _ => tracing::warn!(node = %node, w, "node missed quorum broadcast"),
        }
    }
    acknowledged
}

/// Round-trip latency per node; `None` for nodes that did not answer
/// within the budget.
pub async fn lag<T: Transport>(
    transport: &T,
    nodes: &[NodeId],
    budget: Duration,
) -> Vec<(NodeId, Option<Duration>)> {
    let mut probes = Vec::with_capacity(nodes.len());
    for &node in nodes {
        let started = Instant::now();
        let probe = match transport.call(node, Request::Ping, budget).await {
            Ok(Reply::Pong) => Some(started.elapsed()),
            _ => None,
        };
        probes.push((node, probe));
    }
    probes
}

/// Counters snapshot per node; `None` for nodes that did not answer
/// within the budget.
pub async fn summaries<T: Transport>(
    transport: &T,
    nodes: &[NodeId],
    budget: Duration,
) -> Vec<(NodeId, Option<NodeSummary>)> {
    let mut collected = Vec::with_capacity(nodes.len());
    for &node in nodes {
        let summary = match transport.call(node, Request::Summary, budget).await {
            Ok(Reply::Summary(summary)) => Some(summary),
            _ => None,
        };
        collected.push((node, summary));
    }
    collected
}
