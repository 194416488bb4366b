//! Orchestrator-independent data model shared by all pipelines.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::SchedulingContext;
use crate::resources::{ResourceList, Resources};

// ── Orchestrator objects ───────────────────────────────────────

fn default_namespace() -> String {
    "default".to_string()
}

/// Identity and labels of an orchestrator object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    pub name: String,
    /// Defaults to `default`. Nodes use the empty namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Unix timestamp in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<u64>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            creation_timestamp: None,
        }
    }
}

/// Resource limits and requests of one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRequirements {
    /// What the scheduler accounts for.
    pub limits: ResourceList,
    /// Carried along but not used for placement.
    pub requests: ResourceList,
}

/// A container of a pod. Only its resources matter for scheduling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub resources: ResourceRequirements,
}

/// Desired state of a pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSpec {
    /// Scheduler responsible for the pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    /// Set once the pod is bound to a node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Higher values are scheduled first. Missing means 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub containers: Vec<Container>,
}

/// The workload unit being scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

impl Pod {
    /// A pod with no containers.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: PodSpec::default(),
        }
    }

    /// Stable identity used by the scheduling queue: `<namespace>.<name>`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.metadata.namespace, self.metadata.name)
    }

    /// The pod's priority, 0 if unset.
    pub fn priority(&self) -> i32 {
        self.spec.priority.unwrap_or(0)
    }

    /// Sum of the resource limits of all containers.
    pub fn total_resources(&self) -> Resources {
        let mut total = Resources::new();
        for container in &self.spec.containers {
            total.add_list(&container.resources.limits);
        }
        total
    }
}

/// Observed state of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStatus {
    /// Raw hardware resources.
    pub capacity: ResourceList,
    /// What pods may use. Scheduling works on this.
    pub allocatable: ResourceList,
}

/// A machine that can host pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// A node without any allocatable resources.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new("", name),
            status: NodeStatus::default(),
        }
    }

    /// The node name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

// ── Cluster view ───────────────────────────────────────────────

/// The parts of a pod the nodes cache keeps per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPod {
    pub namespace: String,
    pub name: String,
    pub total_resources: Resources,
}

impl ClusterPod {
    /// Capture the identity and summed limits of `pod`.
    pub fn from_pod(pod: &Pod) -> Self {
        Self {
            namespace: pod.metadata.namespace.clone(),
            name: pod.metadata.name.clone(),
            total_resources: pod.total_resources(),
        }
    }

    /// `true` if this entry describes the pod `namespace/name`.
    pub fn is_same_pod(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

/// A node together with the pods bound or queued on it and the resources
/// that are still available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    #[serde(flatten)]
    pub node: Node,
    /// Pods bound to the node.
    #[serde(default)]
    pub pods: Vec<Arc<ClusterPod>>,
    /// Pods whose binding to the node is in progress.
    #[serde(default)]
    pub queued_pods: Vec<Arc<ClusterPod>>,
    /// Allocatable minus bound and queued pods. May go negative.
    pub available_resources: Resources,
    /// Allocatable resources of the node.
    pub total_resources: Resources,
}

impl ClusterNode {
    /// A node with no pods on it.
    pub fn new(node: Node) -> Self {
        Self::with_pods(node, Vec::new(), Vec::new())
    }

    /// Build a cluster node whose available resources are the allocatable
    /// resources minus those of all bound and queued pods.
    pub fn with_pods(
        node: Node,
        pods: Vec<Arc<ClusterPod>>,
        queued_pods: Vec<Arc<ClusterPod>>,
    ) -> Self {
        let total_resources = Resources::from_list(&node.status.allocatable);
        let mut available_resources = total_resources.clone();
        for pod in pods.iter().chain(queued_pods.iter()) {
            available_resources.subtract(&pod.total_resources);
        }
        Self {
            node,
            pods,
            queued_pods,
            available_resources,
            total_resources,
        }
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }
}

// ── Pipeline items ─────────────────────────────────────────────

/// A pod plus facts the pipelines need about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub pod: Arc<Pod>,
    /// How often the pod went back into the queue after failing.
    #[serde(default)]
    pub scheduling_retry_count: u32,
}

impl PodInfo {
    /// Wrap a pod that has not been retried yet.
    pub fn new(pod: Pod) -> Self {
        Self {
            pod: Arc::new(pod),
            scheduling_retry_count: 0,
        }
    }
}

/// A pod waiting in the scheduling queue, with the context that follows it
/// through the pipelines.
#[derive(Debug, Clone)]
pub struct QueuedPodInfo {
    pub pod_info: Arc<PodInfo>,
    pub ctx: SchedulingContext,
}

impl QueuedPodInfo {
    pub fn new(pod: Pod, ctx: SchedulingContext, scheduling_retry_count: u32) -> Self {
        Self {
            pod_info: Arc::new(PodInfo {
                pod: Arc::new(pod),
                scheduling_retry_count,
            }),
            ctx,
        }
    }

    /// The queued pod.
    pub fn pod(&self) -> &Pod {
        &self.pod_info.pod
    }

    /// Queue key of the pod, see [`Pod::key`].
    pub fn key(&self) -> String {
        self.pod().key()
    }
}

/// A queued pod together with the candidate nodes sampled for it.
#[derive(Debug, Clone)]
pub struct SampledPodInfo {
    pub queued: QueuedPodInfo,
    pub sampled_nodes: Vec<NodeInfo>,
}

/// Score accumulated by a cluster agent's sampling pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingScore {
    /// Sum of the weighted scores of all score plugins.
    pub accumulated_score: i64,
    /// Number of score plugins that contributed.
    pub score_plugins_count: usize,
}

/// A candidate node as seen by a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node: Arc<ClusterNode>,
    /// Set by the sampling pipeline of the node's cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_score: Option<SamplingScore>,
    /// Cluster the node belongs to.
    pub cluster_name: String,
}

impl NodeInfo {
    /// A node of `cluster_name` that has not been sampled.
    pub fn new(cluster_name: impl Into<String>, node: Arc<ClusterNode>) -> Self {
        Self {
            node,
            sampling_score: None,
            cluster_name: cluster_name.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }
}

/// A plugin-local score for one node.
#[derive(Debug, Clone)]
pub struct NodeScore {
    pub node: NodeInfo,
    pub score: i64,
}

/// The outcome of a decision pipeline.
#[derive(Debug, Clone)]
pub struct SchedulingDecision {
    pub pod: Arc<PodInfo>,
    /// The node that won scoring.
    pub target_node: NodeInfo,
}

// ── Wire types ─────────────────────────────────────────────────

/// A decision sent to a cluster for binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSchedulingDecision {
    pub pod: Pod,
    pub node_name: String,
}

/// Per-phase binding timings in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitSchedulingDecisionTimings {
    /// Waiting for a free binding pipeline.
    pub queue_time: i64,
    /// Waiting for the node lock.
    pub node_lock_time: i64,
    pub fetch_node_info: i64,
    pub binding_pipeline: i64,
    pub commit_decision: i64,
    pub create_pod: i64,
    pub create_binding: i64,
}

/// Response body of a successful binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSchedulingDecisionSuccess {
    pub namespace: String,
    pub pod_name: String,
    pub node_name: String,
    pub timings: CommitSchedulingDecisionTimings,
}

/// Error body returned by every REST endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarisErrorDto {
    pub message: String,
}

impl PolarisErrorDto {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PolarisErrorDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PolarisErrorDto {}

/// `{"error": {"message": ...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: PolarisErrorDto,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: PolarisErrorDto::new(message),
        }
    }
}
