//! Local multi-node harness.
//!
//! Spawns a full cluster in one process over an [`InMemoryTransport`]
//! for development and for the scenario tests. Real deployments wire
//! [`crate::Node`] to a network transport instead.

use std::sync::Arc;

use cairn_config::TimingSection;
use cairn_types::{ClusterView, NodeId, Role};

use crate::node::{Node, NodeHandle};
use crate::transport::InMemoryTransport;

/// A cluster of in-process nodes sharing one transport.
///
/// Masters are numbered `0..masters`, replicas follow. The seed view
/// uses the majority quorum for the master count.
pub struct LocalCluster {
    transport: Arc<InMemoryTransport>,
    masters: Vec<NodeHandle>,
    replicas: Vec<NodeHandle>,
}

impl LocalCluster {
    /// Spawns `masters` voting nodes and `replicas` passive nodes.
    ///
    /// # Panics
    ///
    /// Panics if `masters` is 0.
    pub fn spawn(masters: usize, replicas: usize, timing: &TimingSection) -> Self {
        assert!(masters > 0, "a cluster needs at least one master");

        let master_ids: Vec<NodeId> = (0..masters).map(|i| NodeId::new(i as u32)).collect();
        let replica_ids: Vec<NodeId> = (0..replicas)
            .map(|i| NodeId::new((masters + i) as u32))
            .collect();
        let view = ClusterView::new(
            master_ids.clone(),
            replica_ids.clone(),
            ClusterView::majority_of(masters),
        )
        .expect("majority quorum is always valid");

        let transport = Arc::new(InMemoryTransport::new());

        let spawn_one = |id: NodeId, role: Role| {
            let handle = Node::spawn(id, role, view.clone(), timing, Arc::clone(&transport));
            transport.register(id, handle.inbox());
            handle
        };

        let masters = master_ids
            .into_iter()
            .map(|id| spawn_one(id, Role::Master))
            .collect();
        let replicas = replica_ids
            .into_iter()
            .map(|id| spawn_one(id, Role::Replica))
            .collect();

        Self {
            transport,
            masters,
            replicas,
        }
    }

    pub fn transport(&self) -> Arc<InMemoryTransport> {
        Arc::clone(&self.transport)
    }

    pub fn master(&self, index: usize) -> &NodeHandle {
        &self.masters[index]
    }

    pub fn replica(&self, index: usize) -> &NodeHandle {
        &self.replicas[index]
    }

    pub fn masters(&self) -> &[NodeHandle] {
        &self.masters
    }

    pub fn replicas(&self) -> &[NodeHandle] {
        &self.replicas
    }

    /// Stops every node and waits for their tasks.
    pub async fn shutdown(self) {
        for node in self.masters.into_iter().chain(self.replicas) {
            node.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Key, Tag, Value};
    use cairn_wire::{PromiseReply, Reply, Request};

    fn fast_timing() -> TimingSection {
        TimingSection {
            lease_sweep_interval_ms: 20,
            lock_sweep_interval_ms: 20,
            lock_ttl_ms: 50,
            push_interval_ms: 20,
        }
    }

    #[tokio::test]
    async fn cluster_spawns_and_shuts_down() {
        let cluster = LocalCluster::spawn(3, 1, &fast_timing());
        assert_eq!(cluster.masters().len(), 3);
        assert_eq!(cluster.replicas().len(), 1);
        assert_eq!(cluster.master(0).view().w, 2);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn engine_serializes_requests() {
        let cluster = LocalCluster::spawn(1, 0, &fast_timing());
        let node = cluster.master(0);
        let tag = Tag::fresh();

        let granted = node
            .request(Request::Promise {
                key: Key::from("k"),
                expected: None,
                tag,
            })
            .await
            .unwrap();
        assert_eq!(granted, Reply::Promise(PromiseReply::Granted));

        let refused = node
            .request(Request::Promise {
                key: Key::from("k"),
                expected: None,
                tag: Tag::fresh(),
            })
            .await
            .unwrap();
        assert_eq!(refused, Reply::Promise(PromiseReply::AlreadyLocked));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn stale_promises_are_swept() {
        let cluster = LocalCluster::spawn(1, 0, &fast_timing());
        let node = cluster.master(0);

        node.request(Request::Promise {
            key: Key::from("k"),
            expected: None,
            tag: Tag::fresh(),
        })
        .await
        .unwrap();

        // Past the lock TTL plus a sweep period, the abandoned
        // promise no longer blocks the key.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let retry = node
            .request(Request::Promise {
                key: Key::from("k"),
                expected: None,
                tag: Tag::fresh(),
            })
            .await
            .unwrap();
        assert_eq!(retry, Reply::Promise(PromiseReply::Granted));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn pump_ships_commits_to_replicas() {
        let cluster = LocalCluster::spawn(1, 2, &fast_timing());
        let master = cluster.master(0);

        master
            .request(Request::Commit {
                tag: Tag::fresh(),
                key: Key::from("k"),
                value: Value::from("v"),
                lease_ms: 60_000,
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        for index in 0..2 {
            let read = cluster.replica(index).dirty_read(Key::from("k")).await.unwrap();
            assert_eq!(read, Some(Value::from("v")), "replica {index} missing key");
        }

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn expired_leases_vanish_from_dirty_reads() {
        let cluster = LocalCluster::spawn(1, 0, &fast_timing());
        let node = cluster.master(0);

        node.request(Request::Commit {
            tag: Tag::fresh(),
            key: Key::from("k"),
            value: Value::from("v"),
            lease_ms: 30,
        })
        .await
        .unwrap();
        assert_eq!(
            node.dirty_read(Key::from("k")).await.unwrap(),
            Some(Value::from("v"))
        );

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        assert_eq!(node.dirty_read(Key::from("k")).await.unwrap(), None);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn admin_requests_update_the_visible_view() {
        let cluster = LocalCluster::spawn(2, 0, &fast_timing());
        let node = cluster.master(0);

        node.request(Request::SetQuorum { w: 1 }).await.unwrap();
        assert_eq!(node.view().w, 1);
        // Only the addressed node changed.
        assert_eq!(cluster.master(1).view().w, 2);

        cluster.shutdown().await;
    }
}
