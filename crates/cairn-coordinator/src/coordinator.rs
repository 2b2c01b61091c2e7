//! The two-phase protocol driver.

use std::sync::Arc;
use std::time::Duration;

use cairn_cluster::Transport;
use cairn_config::ClientSection;
use cairn_types::{ClusterView, Key, NodeId, Tag, Value};
use cairn_wire::{ExtendReply, PromiseReply, ReleaseReply, Reply, Request};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::CoordinatorError;

/// Successful quorum write: the threshold in force, the number of
/// masters that promised, and the number that acknowledged the
/// commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub w: usize,
    pub voted: usize,
    pub committed: usize,
}

/// Vote bookkeeping for one promise fan-out.
#[derive(Debug, Default)]
struct PromiseTally {
    granted: Vec<NodeId>,
    rejected: Vec<NodeId>,
    down: Vec<NodeId>,
}

/// Client-facing façade over the cluster. Cheap to construct, holds
/// no per-operation state; any number of coordinators may run in
/// parallel against the same cluster.
pub struct Coordinator<T: Transport> {
    transport: Arc<T>,
    view: watch::Receiver<ClusterView>,
    client: ClientSection,
}

impl<T: Transport> Coordinator<T> {
    /// Builds a coordinator over `transport`, reading membership
    /// snapshots from `view` (typically the local node's watch) and
    /// lease/timeout defaults from `client`.
    pub fn new(transport: Arc<T>, view: watch::Receiver<ClusterView>, client: ClientSection) -> Self {
        Self {
            transport,
            view,
            client,
        }
    }

    /// Acquires `key` with the configured default lease and timeout.
    pub async fn lock(&self, key: Key, value: Value) -> Result<QuorumOutcome, CoordinatorError> {
        self.lock_with(
            key,
            value,
            self.client.default_lease_ms,
            self.client.default_timeout(),
        )
        .await
    }

    /// Acquires `key`: promise fan-out expecting the key absent,
    /// then, on quorum, a blind commit to every master.
    pub async fn lock_with(
        &self,
        key: Key,
        value: Value,
        lease_ms: u64,
        timeout: Duration,
    ) -> Result<QuorumOutcome, CoordinatorError> {
        let (view, tag) = self.begin();
        tracing::debug!(tag = %tag, key = ?key, w = view.w, "lock attempt");

        let tally = self
            .promise_phase(&view.masters, view.w, &key, None, tag, timeout)
            .await;
        self.require_quorum(&view, tag, &tally, timeout).await?;

        // Commit goes to all masters, not only the promised ones: a
        // master that missed the promise is brought to a consistent
        // state by the blind write.
        let commit = Request::Commit {
            tag,
            key,
            value,
            lease_ms,
        };
        let committed = self
            .fan_out(&view.masters, &commit, timeout)
            .await
            .iter()
            .filter(|(_, reply)| matches!(reply, Ok(Reply::Committed)))
            .count();

        Ok(QuorumOutcome {
            w: view.w,
            voted: tally.granted.len(),
            committed,
        })
    }

    /// Releases `key` with the configured default timeout.
    pub async fn release(&self, key: Key, value: Value) -> Result<QuorumOutcome, CoordinatorError> {
        self.release_with(key, value, self.client.default_timeout()).await
    }

    /// Releases `key`: ownership-matching promise, then a release
    /// commit to every master *and* every replica, so replicas learn
    /// the deletion synchronously instead of waiting for a log push.
    pub async fn release_with(
        &self,
        key: Key,
        value: Value,
        timeout: Duration,
    ) -> Result<QuorumOutcome, CoordinatorError> {
        let (view, tag) = self.begin();
        tracing::debug!(tag = %tag, key = ?key, "release attempt");

        let tally = self
            .promise_phase(&view.masters, view.w, &key, Some(value.clone()), tag, timeout)
            .await;
        self.require_quorum(&view, tag, &tally, timeout).await?;

        let targets: Vec<NodeId> = view.all_nodes().collect();
        let release = Request::ReleaseCommit { tag, key, value };
        let committed = self
            .fan_out(&targets, &release, timeout)
            .await
            .iter()
            .filter(|(_, reply)| matches!(reply, Ok(Reply::Release(ReleaseReply::Deleted))))
            .count();

        Ok(QuorumOutcome {
            w: view.w,
            voted: tally.granted.len(),
            committed,
        })
    }

    /// Renews the lease on `key` with the configured defaults.
    pub async fn extend_lease(&self, key: Key, value: Value) -> Result<(), CoordinatorError> {
        self.extend_lease_with(
            key,
            value,
            self.client.default_lease_ms,
            self.client.default_timeout(),
        )
        .await
    }

    /// Renews the lease on `key`: ownership-matching promise, then an
    /// extend commit to the masters only — replicas pick the renewed
    /// expiry up from the next log push.
    pub async fn extend_lease_with(
        &self,
        key: Key,
        value: Value,
        lease_ms: u64,
        timeout: Duration,
    ) -> Result<(), CoordinatorError> {
        let (view, tag) = self.begin();
        tracing::debug!(tag = %tag, key = ?key, "extend attempt");

        let tally = self
            .promise_phase(&view.masters, view.w, &key, Some(value.clone()), tag, timeout)
            .await;
        self.require_quorum(&view, tag, &tally, timeout).await?;

        let extend = Request::ExtendCommit {
            tag,
            key,
            value,
            lease_ms,
        };
        let replies = self.fan_out(&view.masters, &extend, timeout).await;

        // A node that answered NotOwner/NotFound applied no commit,
        // so its lock row from the promise must still be cleared.
        let stragglers: Vec<NodeId> = replies
            .iter()
            .filter(|(_, reply)| {
                matches!(
                    reply,
                    Ok(Reply::Extend(ExtendReply::NotOwner | ExtendReply::NotFound))
                )
            })
            .map(|(node, _)| *node)
            .collect();
        if !stragglers.is_empty() {
            tracing::debug!(tag = %tag, nodes = ?stragglers, "aborting extend stragglers");
            self.fan_out(&stragglers, &Request::Abort { tag }, timeout).await;
        }

        Ok(())
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Snapshots the view and mints the per-attempt tag. The view is
    /// read exactly once: a reconfiguration between operations is
    /// honored, one mid-operation is not.
    fn begin(&self) -> (ClusterView, Tag) {
        (self.view.borrow().clone(), Tag::fresh())
    }

    /// Promise fan-out. Collects every reply within the phase budget
    /// so vote counts are complete, but resolves early once the
    /// quorum can no longer be met. Calls outstanding at that point
    /// are dropped; their lock rows, if granted after we stop
    /// listening, are reclaimed by the lock sweep or cleared by a
    /// later commit.
    async fn promise_phase(
        &self,
        masters: &[NodeId],
        w: usize,
        key: &Key,
        expected: Option<Value>,
        tag: Tag,
        budget: Duration,
    ) -> PromiseTally {
        let mut calls = JoinSet::new();
        for &node in masters {
            let transport = Arc::clone(&self.transport);
            let request = Request::Promise {
                key: key.clone(),
                expected: expected.clone(),
                tag,
            };
            calls.spawn(async move { (node, transport.call(node, request, budget).await) });
        }

        let mut tally = PromiseTally::default();
        let mut pending = masters.len();
        while let Some(joined) = calls.join_next().await {
            pending -= 1;
            let Ok((node, outcome)) = joined else { continue };
            match outcome {
                Ok(Reply::Promise(PromiseReply::Granted)) => tally.granted.push(node),
                Ok(Reply::Promise(reply)) => {
                    tracing::debug!(tag = %tag, node = %node, ?reply, "promise rejected");
                    tally.rejected.push(node);
                }
                Ok(unexpected) => {
                    tracing::warn!(tag = %tag, node = %node, ?unexpected, "mismatched promise reply");
                    tally.rejected.push(node);
                }
                Err(error) => {
                    tracing::debug!(tag = %tag, node = %node, %error, "promise target down");
                    tally.down.push(node);
                }
            }

            if tally.granted.len() + pending < w {
                break;
            }
        }
        tally
    }

    /// Fails the operation with a best-effort abort fan-out when the
    /// tally is short of quorum.
    async fn require_quorum(
        &self,
        view: &ClusterView,
        tag: Tag,
        tally: &PromiseTally,
        budget: Duration,
    ) -> Result<(), CoordinatorError> {
        let voted = tally.granted.len();
        if voted >= view.w {
            return Ok(());
        }
        tracing::debug!(
            tag = %tag,
            voted,
            w = view.w,
            rejected = tally.rejected.len(),
            down = tally.down.len(),
            "no quorum, aborting"
        );
        self.fan_out(&view.masters, &Request::Abort { tag }, budget).await;
        Err(CoordinatorError::NoQuorum {
            needed: view.w,
            voted,
        })
    }

    /// Sends `request` to every target concurrently and collects
    /// whatever resolves within the budget.
    async fn fan_out(
        &self,
        targets: &[NodeId],
        request: &Request,
        budget: Duration,
    ) -> Vec<(NodeId, Result<Reply, cairn_cluster::TransportError>)> {
        let mut calls = JoinSet::new();
        for &node in targets {
            let transport = Arc::clone(&self.transport);
            let request = request.clone();
            calls.spawn(async move { (node, transport.call(node, request, budget).await) });
        }

        let mut replies = Vec::with_capacity(targets.len());
        while let Some(joined) = calls.join_next().await {
            if let Ok(entry) = joined {
                replies.push(entry);
            }
        }
        replies
    }
}
