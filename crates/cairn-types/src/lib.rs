//! # cairn-types: Core types for Cairn
//!
//! This crate contains the shared types used across the Cairn system:
//! - Node identity ([`NodeId`]) and per-attempt write tags ([`Tag`])
//! - Opaque payloads ([`Key`], [`Value`])
//! - Temporal types ([`Timestamp`])
//! - Store rows ([`LeaseEntry`], [`LockEntry`])
//! - Replication records ([`TransLogRecord`])
//! - Cluster membership ([`ClusterView`])
//! - Counters ([`NodeSummary`])
//!
//! Everything here is serde-serializable: these types cross the wire
//! verbatim inside `cairn-wire` messages.

use std::fmt::{self, Display};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identity
// ============================================================================

/// Identity of a node in the cluster.
///
/// Nodes are named by small integers assigned by the operator; the id
/// carries no locality information. Masters and replicas share the
/// same namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Unique identifier for one write attempt.
///
/// A fresh tag is generated per coordinator operation and correlates
/// the Promise, Commit, and Abort messages of that attempt. Tags are
/// 128-bit random values, so collisions across concurrent
/// coordinators are astronomically unlikely and tags are never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(Uuid);

impl Tag {
    /// Generates a fresh random tag.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds a tag from raw bytes. Intended for tests that need
    /// deterministic tags.
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// An opaque key. Equality and hashing are the only operations the
/// store performs on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

/// An opaque value. Equality is required for the check-and-set
/// comparison; the store never interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Bytes);

impl Value {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

// ============================================================================
// Time
// ============================================================================

/// Milliseconds since the Unix epoch.
///
/// Cairn requires no clock synchronization across nodes, only a
/// roughly equal rate: every expiry is computed against the clock of
/// the node that stores the row. Arithmetic saturates rather than
/// wrapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    /// Reads the system clock.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Self(millis)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// This instant plus `millis`, saturating at the maximum.
    pub fn plus_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Milliseconds elapsed from `earlier` to `self`; zero if
    /// `earlier` is in the future.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ============================================================================
// Store rows
// ============================================================================

/// A stored value together with its lease deadline.
///
/// Created by a commit, renewed by an extend-commit, destroyed by a
/// release-commit or by the lease sweep once `expires_at` has passed
/// and no lock is held on the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseEntry {
    pub value: Value,
    pub expires_at: Timestamp,
}

/// A granted promise on a key.
///
/// Lock rows are keyed by [`Key`] in the lock map, which makes the
/// at-most-one-lock-per-key invariant structural rather than checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub tag: Tag,
    pub acquired_at: Timestamp,
}

// ============================================================================
// Replication
// ============================================================================

/// One record of the transaction log shipped from masters to
/// replicas.
///
/// `Write` carries the lease duration, not the deadline: each
/// receiver re-anchors the expiry against its own clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransLogRecord {
    Write {
        key: Key,
        value: Value,
        lease_ms: u64,
    },
    Delete {
        key: Key,
    },
}

impl TransLogRecord {
    /// The key this record touches.
    pub fn key(&self) -> &Key {
        match self {
            TransLogRecord::Write { key, .. } | TransLogRecord::Delete { key } => key,
        }
    }
}

// ============================================================================
// Membership
// ============================================================================

/// Error raised by [`ClusterView`] validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ViewError {
    /// The quorum threshold does not fit the master set.
    #[error("quorum threshold {w} out of range for {masters} masters")]
    QuorumOutOfRange { w: usize, masters: usize },
}

/// The process-wide membership snapshot: voting masters, passive
/// replicas, and the write-quorum threshold.
///
/// The view is replaced atomically by the admin operations and read
/// once per coordinator operation, so a reconfiguration never takes
/// effect mid-operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    pub masters: Vec<NodeId>,
    pub replicas: Vec<NodeId>,
    pub w: usize,
}

impl ClusterView {
    /// Builds a validated view. `w` must satisfy
    /// `1 <= w <= masters.len()`.
    pub fn new(masters: Vec<NodeId>, replicas: Vec<NodeId>, w: usize) -> Result<Self, ViewError> {
        if w == 0 || w > masters.len() {
            return Err(ViewError::QuorumOutOfRange {
                w,
                masters: masters.len(),
            });
        }
        Ok(Self {
            masters,
            replicas,
            w,
        })
    }

    /// The usual majority threshold for `n` masters: `n / 2 + 1`.
    pub fn majority_of(n: usize) -> usize {
        n / 2 + 1
    }

    /// Every node in the view, masters first.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.masters.iter().chain(self.replicas.iter()).copied()
    }

    pub fn is_master(&self, node: NodeId) -> bool {
        self.masters.contains(&node)
    }
}

/// The role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Votes in the write quorum and ships its trans-log.
    Master,
    /// Applies shipped trans-logs and serves dirty reads.
    Replica,
}

// ============================================================================
// Counters
// ============================================================================

/// Point-in-time counters for one node, served by the `summary`
/// client operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    /// Rows in the data map.
    pub keys: usize,
    /// Rows in the lock map.
    pub locks: usize,
    /// Records buffered in the trans-log awaiting the next push.
    pub translog_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display_and_roundtrip() {
        let id = NodeId::new(3);
        assert_eq!(id.to_string(), "node-3");
        assert_eq!(u32::from(id), 3);
        assert_eq!(NodeId::from(3), id);
    }

    #[test]
    fn fresh_tags_are_unique() {
        let a = Tag::fresh();
        let b = Tag::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(t.plus_millis(100), Timestamp::from_millis(u64::MAX));

        let early = Timestamp::from_millis(100);
        let late = Timestamp::from_millis(250);
        assert_eq!(late.millis_since(early), 150);
        assert_eq!(early.millis_since(late), 0);
    }

    #[test]
    fn keys_compare_by_content() {
        assert_eq!(Key::from("k"), Key::new(b"k".to_vec()));
        assert_ne!(Key::from("k"), Key::from("other"));
    }

    #[test]
    fn translog_record_exposes_key() {
        let write = TransLogRecord::Write {
            key: Key::from("a"),
            value: Value::from("v"),
            lease_ms: 1000,
        };
        let delete = TransLogRecord::Delete { key: Key::from("b") };
        assert_eq!(write.key(), &Key::from("a"));
        assert_eq!(delete.key(), &Key::from("b"));
    }

    #[test]
    fn cluster_view_validates_quorum() {
        let masters = vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)];

        let view = ClusterView::new(masters.clone(), vec![], 2).unwrap();
        assert_eq!(view.w, 2);
        assert!(view.is_master(NodeId::new(1)));
        assert!(!view.is_master(NodeId::new(9)));

        assert_eq!(
            ClusterView::new(masters.clone(), vec![], 0),
            Err(ViewError::QuorumOutOfRange { w: 0, masters: 3 })
        );
        assert_eq!(
            ClusterView::new(masters, vec![], 4),
            Err(ViewError::QuorumOutOfRange { w: 4, masters: 3 })
        );
    }

    #[test]
    fn majority_thresholds() {
        assert_eq!(ClusterView::majority_of(1), 1);
        assert_eq!(ClusterView::majority_of(3), 2);
        assert_eq!(ClusterView::majority_of(4), 3);
        assert_eq!(ClusterView::majority_of(5), 3);
    }

    #[test]
    fn all_nodes_lists_masters_first() {
        let view = ClusterView::new(
            vec![NodeId::new(0), NodeId::new(1)],
            vec![NodeId::new(10)],
            1,
        )
        .unwrap();
        let nodes: Vec<NodeId> = view.all_nodes().collect();
        assert_eq!(nodes, vec![NodeId::new(0), NodeId::new(1), NodeId::new(10)]);
    }

    #[test]
    fn wire_types_serialize() {
        let entry = LeaseEntry {
            value: Value::from("v"),
            expires_at: Timestamp::from_millis(42),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: LeaseEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
