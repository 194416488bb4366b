//! Contracts for talking to clusters and for the local nodes cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use polaris_collections::ConcurrentObjectStore;

use crate::error::{FrameworkError, FrameworkResult};
use crate::model::{
    ClusterNode, ClusterPod, ClusterSchedulingDecision, CommitSchedulingDecisionSuccess, Node, Pod,
};

/// A cluster that scheduling decisions can be committed to.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    fn cluster_name(&self) -> &str;

    async fn commit_scheduling_decision(
        &self,
        decision: &ClusterSchedulingDecision,
    ) -> anyhow::Result<CommitSchedulingDecisionSuccess>;
}

/// The cluster a cluster agent runs in.
#[async_trait]
pub trait LocalClusterClient: ClusterClient {
    async fn fetch_node(&self, name: &str) -> anyhow::Result<Node>;

    async fn fetch_pods_scheduled_on_node(&self, node_name: &str) -> anyhow::Result<Vec<Pod>>;
}

/// Read access to all clusters known to the scheduler.
pub trait ClusterClientsManager: Send + Sync {
    fn get(&self, cluster_name: &str) -> FrameworkResult<Arc<dyn ClusterClient>>;

    fn clusters_count(&self) -> usize;

    /// Visit every cluster; stops at the first error.
    fn for_each(
        &self,
        f: &mut dyn FnMut(&str, &Arc<dyn ClusterClient>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()>;

    fn cluster_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.clusters_count());
        let _ = self.for_each(&mut |name, _| {
            names.push(name.to_string());
            Ok(())
        });
        names
    }
}

/// A [`ClusterClientsManager`] over a fixed map of clients.
#[derive(Clone, Default)]
pub struct StaticClusterClientsManager {
    clients: BTreeMap<String, Arc<dyn ClusterClient>>,
}

impl StaticClusterClientsManager {
    pub fn new(clients: BTreeMap<String, Arc<dyn ClusterClient>>) -> Self {
        Self { clients }
    }
}

impl ClusterClientsManager for StaticClusterClientsManager {
    fn get(&self, cluster_name: &str) -> FrameworkResult<Arc<dyn ClusterClient>> {
        self.clients
            .get(cluster_name)
            .cloned()
            .ok_or_else(|| FrameworkError::ClusterNotFound(cluster_name.to_string()))
    }

    fn clusters_count(&self) -> usize {
        self.clients.len()
    }

    fn for_each(
        &self,
        f: &mut dyn FnMut(&str, &Arc<dyn ClusterClient>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        for (name, client) in &self.clients {
            f(name, client)?;
        }
        Ok(())
    }
}

/// The cluster agent's view of its nodes.
pub trait NodesCache: Send + Sync {
    /// All nodes, keyed by node name.
    fn nodes(&self) -> &ConcurrentObjectStore<Arc<ClusterNode>>;

    /// Reserve the resources of `pod` on `node_name` until the returned
    /// handle is committed or removed. `None` if the node is unknown.
    fn queue_pod_on_node(&self, pod: &Pod, node_name: &str) -> Option<Box<dyn PodQueuedOnNode>>;
}

/// A pod whose resources are reserved on a node in the nodes cache.
pub trait PodQueuedOnNode: Send + Sync {
    fn pod(&self) -> &ClusterPod;

    fn node_name(&self) -> &str;

    /// Give the reserved resources back.
    fn remove_from_queue(&self);

    /// Move the pod from the queued to the bound pods of its node.
    fn mark_as_committed(&self);
}
