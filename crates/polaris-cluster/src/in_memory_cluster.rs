//! An in-process cluster used by cluster agents that do not front a real
//! orchestrator.
//!
//! Nodes come from a TOML nodes file. Committing a decision creates the pod
//! and binds it to the chosen node; every change is also published to the
//! nodes cache through its update queue.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use anyhow::bail;
use async_trait::async_trait;
use polaris_framework::{
    ClusterClient, ClusterSchedulingDecision, CommitSchedulingDecisionSuccess,
    CommitSchedulingDecisionTimings, LocalClusterClient, Node, Pod, Stopwatch,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::ClusterResult;
use crate::nodes_cache::NodesCacheUpdate;

/// Contents of a nodes file.
#[derive(Debug, Deserialize)]
struct NodesFile {
    #[serde(default)]
    nodes: Vec<Node>,
}

/// Read the nodes of an in-memory cluster from a TOML file with one
/// `[[nodes]]` table per node.
pub fn load_nodes_file(path: &Path) -> ClusterResult<Vec<Node>> {
    let content = std::fs::read_to_string(path)?;
    parse_nodes(&content)
}

pub fn parse_nodes(content: &str) -> ClusterResult<Vec<Node>> {
    let file: NodesFile = toml::from_str(content)?;
    Ok(file.nodes)
}

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<String, Node>,
    /// Pods keyed by `<namespace>.<name>`.
    pods: BTreeMap<String, Pod>,
}

pub struct InMemoryClusterClient {
    cluster_name: String,
    state: RwLock<ClusterState>,
    cache_updates: Option<mpsc::Sender<NodesCacheUpdate>>,
}

impl InMemoryClusterClient {
    pub fn new(cluster_name: impl Into<String>, nodes: impl IntoIterator<Item = Node>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| (node.name().to_string(), node))
            .collect();
        Self {
            cluster_name: cluster_name.into(),
            state: RwLock::new(ClusterState {
                nodes,
                pods: BTreeMap::new(),
            }),
            cache_updates: None,
        }
    }

    /// Publish node and pod changes to a nodes cache.
    pub fn with_cache_updates(mut self, updates: mpsc::Sender<NodesCacheUpdate>) -> Self {
        self.cache_updates = Some(updates);
        self
    }

    pub fn nodes(&self) -> Vec<Node> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.nodes.values().cloned().collect()
    }

    pub fn pods(&self) -> Vec<Pod> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.pods.values().cloned().collect()
    }

    pub async fn add_node(&self, node: Node) {
        let added = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.nodes.insert(node.name().to_string(), node.clone()).is_none()
        };
        let update = if added {
            NodesCacheUpdate::NodeAdded(node)
        } else {
            NodesCacheUpdate::NodeUpdated(node)
        };
        self.publish(update).await;
    }

    pub async fn remove_node(&self, name: &str) -> Option<Node> {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.nodes.remove(name)
        };
        if let Some(node) = &removed {
            self.publish(NodesCacheUpdate::NodeRemoved(node.clone())).await;
        }
        removed
    }

    /// Delete a bound pod, releasing its resources on the node.
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let key = format!("{namespace}.{name}");
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.pods.remove(&key)
        };
        if let Some(pod) = &removed {
            self.publish(NodesCacheUpdate::PodRemoved(pod.clone())).await;
        }
        removed
    }

    async fn publish(&self, update: NodesCacheUpdate) {
        if let Some(tx) = &self.cache_updates {
            if tx.send(update).await.is_err() {
                debug!(cluster = %self.cluster_name, "nodes cache update queue closed");
            }
        }
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn commit_scheduling_decision(
        &self,
        decision: &ClusterSchedulingDecision,
    ) -> anyhow::Result<CommitSchedulingDecisionSuccess> {
        let key = decision.pod.key();
        let create_pod = Stopwatch::new();
        let create_binding = Stopwatch::new();

        let bound = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.nodes.contains_key(&decision.node_name) {
                bail!("node {} not found", decision.node_name);
            }

            create_pod.start();
            if state.pods.contains_key(&key) {
                bail!("pod {key} already exists");
            }
            let mut pod = decision.pod.clone();
            pod.spec.node_name = None;
            state.pods.insert(key.clone(), pod);
            create_pod.stop();

            create_binding.start();
            let pod = state
                .pods
                .get_mut(&key)
                .ok_or_else(|| anyhow::anyhow!("pod {key} vanished before binding"))?;
            pod.spec.node_name = Some(decision.node_name.clone());
            let bound = pod.clone();
            create_binding.stop();
            bound
        };

        info!(
            cluster = %self.cluster_name,
            pod = %key,
            node = %decision.node_name,
            "pod bound"
        );
        self.publish(NodesCacheUpdate::PodAdded(bound)).await;

        Ok(CommitSchedulingDecisionSuccess {
            namespace: decision.pod.metadata.namespace.clone(),
            pod_name: decision.pod.metadata.name.clone(),
            node_name: decision.node_name.clone(),
            timings: CommitSchedulingDecisionTimings {
                create_pod: create_pod.duration_ms(),
                create_binding: create_binding.duration_ms(),
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl LocalClusterClient for InMemoryClusterClient {
    async fn fetch_node(&self, name: &str) -> anyhow::Result<Node> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.nodes.get(name) {
            Some(node) => Ok(node.clone()),
            None => bail!("node {name} not found"),
        }
    }

    async fn fetch_pods_scheduled_on_node(&self, node_name: &str) -> anyhow::Result<Vec<Pod>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .pods
            .values()
            .filter(|pod| pod.spec.node_name.as_deref() == Some(node_name))
            .cloned()
            .collect())
    }
}
