//! Cluster agent nodes cache.
//!
//! Node and pod events are queued by producers and applied in batches by a
//! single updater task: every tick it drains the queue under one write lock
//! on the nodes store. Stored nodes are never mutated in place; each change
//! replaces the node with an updated copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use polaris_collections::{ConcurrentObjectStore, StoreWriter};
use polaris_framework::{ClusterNode, ClusterPod, Node, NodesCache, Pod, PodQueuedOnNode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};

type NodesStore = ConcurrentObjectStore<Arc<ClusterNode>>;

/// A change observed in the cluster.
#[derive(Debug, Clone)]
pub enum NodesCacheUpdate {
    NodeAdded(Node),
    NodeUpdated(Node),
    NodeRemoved(Node),
    PodAdded(Pod),
    PodUpdated(Pod),
    PodRemoved(Pod),
}

pub struct ClusterNodesCache {
    store: Arc<NodesStore>,
    update_interval: Duration,
    updates_tx: mpsc::Sender<NodesCacheUpdate>,
    updates_rx: Mutex<mpsc::Receiver<NodesCacheUpdate>>,
    watching: AtomicBool,
}

impl ClusterNodesCache {
    pub fn new(update_interval: Duration, update_queue_size: usize) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(update_queue_size.max(1));
        Self {
            store: Arc::new(NodesStore::new()),
            update_interval,
            updates_tx,
            updates_rx: Mutex::new(updates_rx),
            watching: AtomicBool::new(false),
        }
    }

    /// Sender for cluster events.
    pub fn updates(&self) -> mpsc::Sender<NodesCacheUpdate> {
        self.updates_tx.clone()
    }

    /// Seed the cache with `nodes` without going through the update queue.
    pub fn load_nodes(&self, nodes: impl IntoIterator<Item = Node>) {
        let mut writer = self.store.write_lock();
        for node in nodes {
            let name = node.name().to_string();
            writer.set(name, Arc::new(ClusterNode::new(node)));
        }
    }

    /// Spawn the updater task. It runs until `cancel` fires.
    pub fn start_watch(self: &Arc<Self>, cancel: CancellationToken) -> ClusterResult<JoinHandle<()>> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::WatchAlreadyStarted);
        }
        let cache = self.clone();
        info!(interval_ms = self.update_interval.as_millis() as u64, "nodes cache watch started");
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.update_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.apply_pending_updates();
                    }
                }
            }
            info!("nodes cache watch stopped");
        }))
    }

    /// Apply every queued update under a single write lock. Returns the
    /// number of updates applied.
    pub fn apply_pending_updates(&self) -> usize {
        let mut rx = self.updates_rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writer: Option<StoreWriter<'_, Arc<ClusterNode>>> = None;
        let mut applied = 0;
        while let Ok(update) = rx.try_recv() {
            let writer = writer.get_or_insert_with(|| self.store.write_lock());
            apply_update(writer, update);
            applied += 1;
        }
        if applied > 0 {
            debug!(applied, "nodes cache updated");
        }
        applied
    }
}

impl NodesCache for ClusterNodesCache {
    fn nodes(&self) -> &ConcurrentObjectStore<Arc<ClusterNode>> {
        &self.store
    }

    fn queue_pod_on_node(&self, pod: &Pod, node_name: &str) -> Option<Box<dyn PodQueuedOnNode>> {
        let cluster_pod = Arc::new(ClusterPod::from_pod(pod));
        let mut writer = self.store.write_lock();
        let old = writer.get_by_key(node_name)?.clone();

        let mut queued = old.queued_pods.clone();
        queued.push(cluster_pod.clone());
        let updated = ClusterNode::with_pods(old.node.clone(), old.pods.clone(), queued);
        writer.set(node_name, Arc::new(updated));

        Some(Box::new(QueuedPod {
            store: self.store.clone(),
            pod: cluster_pod,
            node_name: node_name.to_string(),
        }))
    }
}

// ── Update application ─────────────────────────────────────────

fn apply_update(writer: &mut StoreWriter<'_, Arc<ClusterNode>>, update: NodesCacheUpdate) {
    match update {
        NodesCacheUpdate::NodeAdded(node) => {
            let name = node.name().to_string();
            writer.set(name, Arc::new(ClusterNode::new(node)));
        }
        NodesCacheUpdate::NodeUpdated(node) => {
            let name = node.name().to_string();
            let updated = match writer.get_by_key(&name) {
                Some(old) => {
                    ClusterNode::with_pods(node, old.pods.clone(), old.queued_pods.clone())
                }
                None => ClusterNode::new(node),
            };
            writer.set(name, Arc::new(updated));
        }
        NodesCacheUpdate::NodeRemoved(node) => {
            writer.remove(node.name());
        }
        NodesCacheUpdate::PodAdded(pod) | NodesCacheUpdate::PodUpdated(pod) => {
            with_pod_node(writer, &pod, |old| add_or_update_pod(old, &pod));
        }
        NodesCacheUpdate::PodRemoved(pod) => {
            with_pod_node(writer, &pod, |old| {
                remove_pod(old, &pod.metadata.namespace, &pod.metadata.name)
            });
        }
    }
}

/// Replace the node `pod` is bound to with `f(node)`. Pods that are not
/// bound, or bound to unknown nodes, are ignored.
fn with_pod_node(
    writer: &mut StoreWriter<'_, Arc<ClusterNode>>,
    pod: &Pod,
    f: impl FnOnce(&ClusterNode) -> ClusterNode,
) {
    let Some(node_name) = pod.spec.node_name.as_deref() else {
        return;
    };
    let Some(old) = writer.get_by_key(node_name) else {
        warn!(pod = %pod.key(), node = %node_name, "pod event for unknown node ignored");
        return;
    };
    let updated = f(old);
    writer.set(node_name, Arc::new(updated));
}

fn add_or_update_pod(old: &ClusterNode, pod: &Pod) -> ClusterNode {
    let cluster_pod = Arc::new(ClusterPod::from_pod(pod));
    let mut pods = old.pods.clone();
    match pods
        .iter_mut()
        .find(|p| p.is_same_pod(&cluster_pod.namespace, &cluster_pod.name))
    {
        Some(slot) => *slot = cluster_pod,
        None => pods.push(cluster_pod),
    }
    ClusterNode::with_pods(old.node.clone(), pods, old.queued_pods.clone())
}

fn remove_pod(old: &ClusterNode, namespace: &str, name: &str) -> ClusterNode {
    let pods = without_pod(&old.pods, namespace, name);
    ClusterNode::with_pods(old.node.clone(), pods, old.queued_pods.clone())
}

fn without_pod(pods: &[Arc<ClusterPod>], namespace: &str, name: &str) -> Vec<Arc<ClusterPod>> {
    pods.iter()
        .filter(|p| !p.is_same_pod(namespace, name))
        .cloned()
        .collect()
}

// ── Queued pod handle ──────────────────────────────────────────

struct QueuedPod {
    store: Arc<NodesStore>,
    pod: Arc<ClusterPod>,
    node_name: String,
}

impl QueuedPod {
    fn update_node(&self, f: impl FnOnce(&ClusterNode) -> ClusterNode) {
        let mut writer = self.store.write_lock();
        let Some(old) = writer.get_by_key(&self.node_name) else {
            debug!(node = %self.node_name, pod = %self.pod.name, "node of queued pod is gone");
            return;
        };
        let updated = f(old);
        writer.set(self.node_name.as_str(), Arc::new(updated));
    }
}

impl PodQueuedOnNode for QueuedPod {
    fn pod(&self) -> &ClusterPod {
        &self.pod
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    fn remove_from_queue(&self) {
        self.update_node(|old| {
            let queued = without_pod(&old.queued_pods, &self.pod.namespace, &self.pod.name);
            ClusterNode::with_pods(old.node.clone(), old.pods.clone(), queued)
        });
    }

    fn mark_as_committed(&self) {
        self.update_node(|old| {
            let queued = without_pod(&old.queued_pods, &self.pod.namespace, &self.pod.name);
            let mut pods = without_pod(&old.pods, &self.pod.namespace, &self.pod.name);
            pods.push(self.pod.clone());
            ClusterNode::with_pods(old.node.clone(), pods, queued)
        });
    }
}
