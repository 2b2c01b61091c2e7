//! Node state and message handlers.

use std::collections::HashMap;

use cairn_types::{
    ClusterView, Key, LeaseEntry, LockEntry, NodeId, NodeSummary, Tag, Timestamp, TransLogRecord,
    Value,
};
use cairn_wire::{ExtendReply, PromiseReply, ReleaseReply, Reply, Request};

/// A cloned snapshot of the mutable node state, for tests and
/// observability.
#[derive(Debug, Clone)]
pub struct DebugState {
    pub data: HashMap<Key, LeaseEntry>,
    pub locks: HashMap<Key, LockEntry>,
    pub view: ClusterView,
}

/// The authoritative in-memory state of one node.
///
/// Three tables and a buffer:
/// - `data`: `Key → (Value, expires_at)` — the leased entries.
/// - `locks`: `Key → (Tag, acquired_at)` — granted promises. Keying
///   by `Key` enforces at most one lock per key structurally.
/// - `view`: the membership snapshot (masters, replicas, quorum).
/// - `translog`: Write/Delete records accumulated since the last
///   push, drained by the replication pump.
#[derive(Debug, Clone)]
pub struct NodeState {
    node_id: NodeId,
    /// Inactivity window after which a lock row is reclaimed by the
    /// lock sweep. Long enough to cover a commit round-trip, short
    /// enough that a crashed coordinator does not stall the key.
    lock_ttl_ms: u64,
    data: HashMap<Key, LeaseEntry>,
    locks: HashMap<Key, LockEntry>,
    view: ClusterView,
    translog: Vec<TransLogRecord>,
}

impl NodeState {
    pub fn new(node_id: NodeId, view: ClusterView, lock_ttl_ms: u64) -> Self {
        Self {
            node_id,
            lock_ttl_ms,
            data: HashMap::new(),
            locks: HashMap::new(),
            view,
            translog: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The current membership snapshot.
    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    // ========================================================================
    // Request dispatch
    // ========================================================================

    /// Processes one request against the current state. Expected
    /// protocol outcomes are tagged replies; this never fails.
    pub fn handle(&mut self, request: Request, now: Timestamp) -> Reply {
        match request {
            Request::Promise { key, expected, tag } => {
                Reply::Promise(self.on_promise(key, expected, tag, now))
            }
            Request::Commit {
                tag,
                key,
                value,
                lease_ms,
            } => {
                self.on_commit(tag, key, value, lease_ms, now);
                Reply::Committed
            }
            Request::Abort { tag } => {
                self.on_abort(tag);
                Reply::Aborted
            }
            Request::ExtendCommit {
                tag,
                key,
                value,
                lease_ms,
            } => Reply::Extend(self.on_extend_commit(tag, key, value, lease_ms, now)),
            Request::ReleaseCommit { tag, key, value } => {
                Reply::Release(self.on_release_commit(tag, key, value))
            }
            Request::SetMasters { masters } => {
                self.on_set_masters(masters);
                Reply::AdminOk
            }
            Request::SetReplicas { replicas } => {
                self.on_set_replicas(replicas);
                Reply::AdminOk
            }
            Request::SetQuorum { w } => {
                self.on_set_quorum(w);
                Reply::AdminOk
            }
            Request::Ping => Reply::Pong,
            Request::Summary => Reply::Summary(self.summary()),
        }
    }

    // ========================================================================
    // Two-phase write handlers
    // ========================================================================

    /// Phase 1. Grants exclusive write intent on `key` under `tag` if
    /// no lock is held and the stored value matches the expectation.
    ///
    /// When two concurrent promises for the same key reach this node,
    /// the first one processed wins; the second sees `AlreadyLocked`.
    /// Which coordinator wins overall is decided by quorum
    /// arithmetic, not here.
    pub fn on_promise(
        &mut self,
        key: Key,
        expected: Option<Value>,
        tag: Tag,
        now: Timestamp,
    ) -> PromiseReply {
        if self.locks.contains_key(&key) {
            tracing::debug!(node = %self.node_id, tag = %tag, key = ?key, "promise refused, key locked");
            return PromiseReply::AlreadyLocked;
        }

        // An expired-but-unswept entry is still visible here: removal
        // is the sweep's job, and the sweep respects held locks.
        let matches = match (&expected, self.data.get(&key)) {
            (None, None) => true,
            (Some(expected), Some(entry)) => entry.value == *expected,
            _ => false,
        };

        if matches {
            self.locks.insert(
                key,
                LockEntry {
                    tag,
                    acquired_at: now,
                },
            );
            PromiseReply::Granted
        } else {
            tracing::debug!(node = %self.node_id, tag = %tag, key = ?key, "promise refused, expectation failed");
            PromiseReply::NotExpected
        }
    }

    /// Phase 2. Unconditional: the coordinator is trusted to have
    /// obtained quorum, so a master that never saw the promise (it
    /// was partitioned or slow) is brought to a consistent state by
    /// the blind write. Pairing the write with the lock release saves
    /// a round-trip.
    pub fn on_commit(&mut self, tag: Tag, key: Key, value: Value, lease_ms: u64, now: Timestamp) {
        self.locks.retain(|_, lock| lock.tag != tag);
        self.data.insert(
            key.clone(),
            LeaseEntry {
                value: value.clone(),
                expires_at: now.plus_millis(lease_ms),
            },
        );
        self.translog.push(TransLogRecord::Write {
            key,
            value,
            lease_ms,
        });
    }

    /// Drops every lock row held under `tag`. Idempotent; aborting a
    /// tag this node never granted is a no-op.
    pub fn on_abort(&mut self, tag: Tag) {
        self.locks.retain(|_, lock| lock.tag != tag);
    }

    /// Renews the lease deadline if the stored value still matches.
    ///
    /// The value match, not the tag, identifies the owner: a node
    /// that joined after the original lock was taken can still accept
    /// the extension. On `NotOwner`/`NotFound` the lock row under
    /// `tag` is kept — the coordinator follows up with an abort.
    pub fn on_extend_commit(
        &mut self,
        tag: Tag,
        key: Key,
        value: Value,
        lease_ms: u64,
        now: Timestamp,
    ) -> ExtendReply {
        match self.data.get_mut(&key) {
            Some(entry) if entry.value == value => {
                entry.expires_at = now.plus_millis(lease_ms);
                self.locks.retain(|_, lock| lock.tag != tag);
                self.translog.push(TransLogRecord::Write {
                    key,
                    value,
                    lease_ms,
                });
                ExtendReply::Renewed
            }
            Some(_) => ExtendReply::NotOwner,
            None => ExtendReply::NotFound,
        }
    }

    /// Deletes the entry if the stored value still matches, recording
    /// the deletion for replicas.
    pub fn on_release_commit(&mut self, tag: Tag, key: Key, value: Value) -> ReleaseReply {
        match self.data.get(&key) {
            Some(entry) if entry.value == value => {
                self.data.remove(&key);
                self.translog.push(TransLogRecord::Delete { key });
                self.locks.retain(|_, lock| lock.tag != tag);
                ReleaseReply::Deleted
            }
            Some(_) => ReleaseReply::NotOwner,
            None => ReleaseReply::NotFound,
        }
    }

    // ========================================================================
    // Replication
    // ========================================================================

    /// Applies a shipped trans-log batch blindly, in order.
    ///
    /// Lease deadlines are re-anchored on this node's clock, which is
    /// why records carry durations rather than instants. Duplicate
    /// batches are harmless: identical writes are idempotent and
    /// last-writer-wins settles per-key order across masters.
    pub fn on_apply_log(&mut self, origin: NodeId, records: Vec<TransLogRecord>, now: Timestamp) {
        tracing::debug!(
            node = %self.node_id,
            origin = %origin,
            count = records.len(),
            "applying trans-log batch"
        );
        for record in records {
            match record {
                TransLogRecord::Write {
                    key,
                    value,
                    lease_ms,
                } => {
                    self.data.insert(
                        key,
                        LeaseEntry {
                            value,
                            expires_at: now.plus_millis(lease_ms),
                        },
                    );
                }
                TransLogRecord::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
    }

    /// Takes the accumulated trans-log, leaving an empty buffer, and
    /// coalesces it to the last record per key. Order among the
    /// surviving records is preserved.
    pub fn drain_translog(&mut self) -> Vec<TransLogRecord> {
        let raw = std::mem::take(&mut self.translog);
        if raw.len() < 2 {
            return raw;
        }

        let mut last_for_key: HashMap<Key, usize> = HashMap::with_capacity(raw.len());
        for (index, record) in raw.iter().enumerate() {
            last_for_key.insert(record.key().clone(), index);
        }
        raw.into_iter()
            .enumerate()
            .filter(|(index, record)| last_for_key[record.key()] == *index)
            .map(|(_, record)| record)
            .collect()
    }

    // ========================================================================
    // Expiration sweeps
    // ========================================================================

    /// Removes entries whose lease elapsed, skipping keys that are
    /// currently locked: a commit in flight holds the lock and is
    /// about to refresh the key, and deleting under it would expose a
    /// phantom miss to a racing extension.
    ///
    /// No deletion record is appended: expiry is a clock-local event
    /// and every node expires its own copy.
    pub fn sweep_leases(&mut self, now: Timestamp) -> usize {
        let before = self.data.len();
        let locks = &self.locks;
        self.data
            .retain(|key, entry| entry.expires_at >= now || locks.contains_key(key));
        let removed = before - self.data.len();
        if removed > 0 {
            tracing::debug!(node = %self.node_id, removed, "lease sweep");
        }
        removed
    }

    /// Removes lock rows that outlived the lock TTL, so a stalled or
    /// crashed coordinator cannot block a key forever.
    pub fn sweep_locks(&mut self, now: Timestamp) -> usize {
        let before = self.locks.len();
        let ttl = self.lock_ttl_ms;
        self.locks
            .retain(|_, lock| now.millis_since(lock.acquired_at) <= ttl);
        let removed = before - self.locks.len();
        if removed > 0 {
            tracing::debug!(node = %self.node_id, removed, "lock sweep reclaimed stale promises");
        }
        removed
    }

    // ========================================================================
    // Membership
    // ========================================================================

    fn on_set_masters(&mut self, masters: Vec<NodeId>) {
        tracing::info!(node = %self.node_id, masters = ?masters, "master set replaced");
        self.view.masters = masters;
        self.warn_if_view_inconsistent();
    }

    fn on_set_replicas(&mut self, replicas: Vec<NodeId>) {
        tracing::info!(node = %self.node_id, replicas = ?replicas, "replica set replaced");
        self.view.replicas = replicas;
    }

    fn on_set_quorum(&mut self, w: usize) {
        tracing::info!(node = %self.node_id, w, "quorum threshold replaced");
        self.view.w = w;
        self.warn_if_view_inconsistent();
    }

    /// Reconfiguration is best-effort broadcast: master set and
    /// quorum arrive in separate messages, so the combination may be
    /// transiently unsatisfiable. Writes quiesce during
    /// reconfiguration by operator convention; we only flag it.
    fn warn_if_view_inconsistent(&self) {
        if self.view.w == 0 || self.view.w > self.view.masters.len() {
            tracing::warn!(
                node = %self.node_id,
                w = self.view.w,
                masters = self.view.masters.len(),
                "quorum threshold unsatisfiable with current master set"
            );
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Dirty read: the locally stored value, quorum not consulted.
    /// May return a stale or expired-but-not-swept value.
    pub fn dirty_read(&self, key: &Key) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value.clone())
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            keys: self.data.len(),
            locks: self.locks.len(),
            translog_depth: self.translog.len(),
        }
    }

    /// Clones the mutable tables for tests and observability.
    pub fn debug_state(&self) -> DebugState {
        DebugState {
            data: self.data.clone(),
            locks: self.locks.clone(),
            view: self.view.clone(),
        }
    }
}
