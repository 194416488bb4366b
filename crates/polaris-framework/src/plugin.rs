//! Plugin contracts of the scheduling, sampling, and binding pipelines.
//!
//! Every plugin implements [`Plugin`]. The stages a plugin takes part in are
//! advertised through the `as_*` capability casts, which return `Some` for
//! each stage trait the plugin implements:
//!
//! ```ignore
//! impl Plugin for ResourcesFit {
//!     fn name(&self) -> &str { "ResourcesFit" }
//!     fn as_filter(self: Arc<Self>) -> Option<Arc<dyn FilterPlugin>> { Some(self) }
//! }
//! ```
//!
//! The casts are only used while the pipelines are assembled, so one
//! instance can serve several stages without any per-call dispatch.
//!
//! Stage methods return `Result<_, Status>`; `Err` always carries a
//! non-success status.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SchedulingContext;
use crate::model::{NodeInfo, NodeScore, PodInfo, QueuedPodInfo, SchedulingDecision};
use crate::status::Status;

pub type StageResult<T = ()> = Result<T, Status>;

/// Base trait of all plugins.
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn as_sort(self: Arc<Self>) -> Option<Arc<dyn SortPlugin>> {
        None
    }

    fn as_sample_nodes(self: Arc<Self>) -> Option<Arc<dyn SampleNodesPlugin>> {
        None
    }

    fn as_pre_filter(self: Arc<Self>) -> Option<Arc<dyn PreFilterPlugin>> {
        None
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn FilterPlugin>> {
        None
    }

    fn as_pre_score(self: Arc<Self>) -> Option<Arc<dyn PreScorePlugin>> {
        None
    }

    fn as_score(self: Arc<Self>) -> Option<Arc<dyn ScorePlugin>> {
        None
    }

    fn as_reserve(self: Arc<Self>) -> Option<Arc<dyn ReservePlugin>> {
        None
    }

    fn as_sampling_strategy(self: Arc<Self>) -> Option<Arc<dyn SamplingStrategyPlugin>> {
        None
    }

    fn as_check_conflicts(self: Arc<Self>) -> Option<Arc<dyn CheckConflictsPlugin>> {
        None
    }
}

/// Orders pods in the scheduling queue.
pub trait SortPlugin: Plugin {
    /// `true` if `a` must be scheduled before `b`.
    fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool;
}

/// Produces the candidate nodes for a pod, locally or from remote clusters.
#[async_trait]
pub trait SampleNodesPlugin: Plugin {
    async fn sample_nodes(
        &self,
        ctx: &SchedulingContext,
        pod: &PodInfo,
    ) -> StageResult<Vec<NodeInfo>>;
}

/// Runs once per pod before filtering.
pub trait PreFilterPlugin: Plugin {
    fn pre_filter(&self, ctx: &SchedulingContext, pod: &PodInfo) -> StageResult;
}

/// Runs once per (pod, candidate node). `Unschedulable` prunes the node,
/// `InternalError` aborts the pod.
pub trait FilterPlugin: Plugin {
    fn filter(&self, ctx: &SchedulingContext, pod: &PodInfo, node: &NodeInfo) -> StageResult;
}

/// Runs once per pod on the nodes that survived filtering.
pub trait PreScorePlugin: Plugin {
    fn pre_score(
        &self,
        ctx: &SchedulingContext,
        pod: &PodInfo,
        eligible_nodes: &[NodeInfo],
    ) -> StageResult;
}

/// Optional normalization of a score plugin's raw scores into
/// `[MIN_NODE_SCORE, MAX_NODE_SCORE]`.
pub trait ScoreExtensions: Send + Sync {
    fn normalize_scores(
        &self,
        ctx: &SchedulingContext,
        pod: &PodInfo,
        scores: &mut [NodeScore],
    ) -> StageResult;
}

/// Scores a single candidate node.
pub trait ScorePlugin: Plugin {
    fn score(&self, ctx: &SchedulingContext, pod: &PodInfo, node: &NodeInfo) -> StageResult<i64>;

    fn score_extensions(&self) -> Option<&dyn ScoreExtensions> {
        None
    }
}

/// Commit/rollback hooks for the winning node.
pub trait ReservePlugin: Plugin {
    fn reserve(&self, ctx: &SchedulingContext, pod: &PodInfo, target: &NodeInfo) -> StageResult;

    /// Must be idempotent and must tolerate being called without a prior
    /// `reserve`.
    fn unreserve(&self, ctx: &SchedulingContext, pod: &PodInfo, target: &NodeInfo);
}

/// Selects a subset of the local nodes cache. One instance is shared by all
/// sampling pipelines, so implementations must be internally thread-safe.
pub trait SamplingStrategyPlugin: Plugin {
    /// Name used in the `/samples/<strategy-name>` route.
    fn strategy_name(&self) -> &str;

    fn sample_nodes(
        &self,
        ctx: &SchedulingContext,
        pod: &PodInfo,
        sample_size: usize,
    ) -> StageResult<Vec<NodeInfo>>;
}

/// Re-validates a decision against freshly fetched node state before it is
/// committed.
pub trait CheckConflictsPlugin: Plugin {
    fn check_for_conflicts(
        &self,
        ctx: &SchedulingContext,
        decision: &SchedulingDecision,
    ) -> StageResult;
}

/// A score plugin together with its configured weight.
#[derive(Clone)]
pub struct WeightedScorePlugin {
    pub plugin: Arc<dyn ScorePlugin>,
    pub weight: i64,
}

/// Stage plugins of one decision pipeline instance.
#[derive(Clone, Default)]
pub struct DecisionPipelinePlugins {
    pub pre_filter: Vec<Arc<dyn PreFilterPlugin>>,
    pub filter: Vec<Arc<dyn FilterPlugin>>,
    pub pre_score: Vec<Arc<dyn PreScorePlugin>>,
    pub score: Vec<WeightedScorePlugin>,
    pub reserve: Vec<Arc<dyn ReservePlugin>>,
}

/// Stage plugins of one sampling pipeline instance. The sampling strategy
/// is passed per call.
#[derive(Clone, Default)]
pub struct SamplingPipelinePlugins {
    pub pre_filter: Vec<Arc<dyn PreFilterPlugin>>,
    pub filter: Vec<Arc<dyn FilterPlugin>>,
    pub pre_score: Vec<Arc<dyn PreScorePlugin>>,
    pub score: Vec<WeightedScorePlugin>,
}

/// Stage plugins of one binding pipeline instance.
#[derive(Clone, Default)]
pub struct BindingPipelinePlugins {
    pub check_conflicts: Vec<Arc<dyn CheckConflictsPlugin>>,
}
