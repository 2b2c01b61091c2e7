//! Inter-node messages for the Cairn coordination protocol.
//!
//! Three top-level unions cross the cluster messaging layer:
//!
//! ## Requests (unicast, replied)
//! - [`Request::Promise`] - Coordinator → Master: reserve write intent on a key
//! - [`Request::Commit`] - Coordinator → Master: quorum proven, write the lease
//! - [`Request::Abort`] - Coordinator → Master: reservation abandoned
//! - [`Request::ExtendCommit`] - Coordinator → Master: renew a held lease
//! - [`Request::ReleaseCommit`] - Coordinator → Master/Replica: delete a held lease
//! - [`Request::SetMasters`] / [`Request::SetReplicas`] / [`Request::SetQuorum`] -
//!   Admin → All: replace one membership item
//! - [`Request::Ping`] / [`Request::Summary`] - probes for the `lag` and
//!   `summary` client operations
//!
//! ## Asynchronous pushes (broadcast, no reply)
//! - [`Push::ApplyLog`] - Master → Replica: apply this trans-log batch
//!
//! Replies are tagged per operation; expected protocol outcomes
//! (`AlreadyLocked`, `NotOwner`, ...) are reply variants, never
//! transport errors. The canonical encoding is postcard; any encoding
//! preserving tagged-union semantics and opaque byte payloads would
//! interoperate.

use cairn_types::{Key, NodeId, NodeSummary, Tag, TransLogRecord, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Requests
// ============================================================================

/// A unicast request expecting exactly one [`Reply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Phase 1: reserve exclusive write intent on `key` under `tag`,
    /// conditional on the stored value matching `expected`
    /// (`None` = key expected absent).
    Promise {
        key: Key,
        expected: Option<Value>,
        tag: Tag,
    },

    /// Phase 2: the coordinator has proven quorum; write the lease
    /// and drop any lock rows held under `tag`.
    Commit {
        tag: Tag,
        key: Key,
        value: Value,
        lease_ms: u64,
    },

    /// Drop any lock rows held under `tag`. Idempotent.
    Abort { tag: Tag },

    /// Phase 2 of `extend_lease`: renew the lease deadline if the
    /// stored value still matches `value`.
    ExtendCommit {
        tag: Tag,
        key: Key,
        value: Value,
        lease_ms: u64,
    },

    /// Phase 2 of `release`: delete the entry if the stored value
    /// still matches `value`.
    ReleaseCommit { tag: Tag, key: Key, value: Value },

    /// Replace the master set.
    SetMasters { masters: Vec<NodeId> },

    /// Replace the replica set.
    SetReplicas { replicas: Vec<NodeId> },

    /// Replace the write-quorum threshold.
    SetQuorum { w: usize },

    /// Round-trip probe for the `lag` client operation.
    Ping,

    /// Counters snapshot for the `summary` client operation.
    Summary,
}

impl Request {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Promise { .. } => "promise",
            Request::Commit { .. } => "commit",
            Request::Abort { .. } => "abort",
            Request::ExtendCommit { .. } => "extend-commit",
            Request::ReleaseCommit { .. } => "release-commit",
            Request::SetMasters { .. } => "set-masters",
            Request::SetReplicas { .. } => "set-replicas",
            Request::SetQuorum { .. } => "set-quorum",
            Request::Ping => "ping",
            Request::Summary => "summary",
        }
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Outcome of a [`Request::Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseReply {
    /// The reservation was granted and a lock row recorded.
    Granted,
    /// Another tag already holds a lock on the key.
    AlreadyLocked,
    /// The stored value did not match the expectation.
    NotExpected,
}

/// Outcome of a [`Request::ExtendCommit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendReply {
    /// The deadline was renewed.
    Renewed,
    /// The key is present but holds a different value.
    NotOwner,
    /// The key is absent.
    NotFound,
}

/// Outcome of a [`Request::ReleaseCommit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReply {
    /// The entry was deleted.
    Deleted,
    /// The key is present but holds a different value.
    NotOwner,
    /// The key is absent.
    NotFound,
}

/// The reply to a [`Request`]. Variants pair one-to-one with request
/// variants; a node answering a request with a mismatched reply kind
/// is a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Promise(PromiseReply),
    /// Commits are unconditional: the node trusts the quorum claim.
    Committed,
    Aborted,
    Extend(ExtendReply),
    Release(ReleaseReply),
    AdminOk,
    Pong,
    Summary(NodeSummary),
}

// ============================================================================
// Asynchronous pushes
// ============================================================================

/// A fire-and-forget broadcast message. No reply is ever sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Push {
    /// A trans-log batch from `origin`. Receivers apply records in
    /// order, blindly, re-anchoring lease deadlines on their own
    /// clock.
    ApplyLog {
        origin: NodeId,
        records: Vec<TransLogRecord>,
    },
}

// ============================================================================
// Codec
// ============================================================================

/// Wire encode/decode failures.
///
/// A decode failure on a request path surfaces to the transport; a
/// decode failure on the push path is fatal at the engine (the
/// process is expected to be restarted by its supervisor).
#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(#[source] postcard::Error),

    #[error("decode failed: {0}")]
    Decode(#[source] postcard::Error),
}

/// Encodes a message with the canonical postcard encoding.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(message).map_err(WireError::Encode)
}

/// Decodes a message from the canonical postcard encoding.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, WireError> {
    postcard::from_bytes(bytes).map_err(WireError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_survives_the_wire() {
        let request = Request::Promise {
            key: Key::from("k"),
            expected: None,
            tag: Tag::from_u128(7),
        };
        let bytes = encode(&request).unwrap();
        let back: Request = decode(&bytes).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn apply_log_preserves_record_order() {
        let push = Push::ApplyLog {
            origin: NodeId::new(1),
            records: vec![
                TransLogRecord::Write {
                    key: Key::from("a"),
                    value: Value::from("1"),
                    lease_ms: 500,
                },
                TransLogRecord::Delete { key: Key::from("b") },
            ],
        };
        let back: Push = decode(&encode(&push).unwrap()).unwrap();
        assert_eq!(back, push);
    }

    #[test]
    fn garbage_does_not_decode() {
        let result: Result<Request, WireError> = decode(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[test]
    fn request_kinds_are_stable() {
        assert_eq!(Request::Ping.kind(), "ping");
        assert_eq!(Request::Abort { tag: Tag::from_u128(1) }.kind(), "abort");
    }
}
