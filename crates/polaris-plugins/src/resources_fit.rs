//! Keeps pods off nodes that cannot hold them and scores nodes by how much
//! of their resources are in use.
//!
//! Stages: PreFilter, Filter, Score, CheckConflicts. PreFilter stores the
//! pod's total resource limits in the [`SchedulingContext`]; the other
//! stages read them from there.

use std::sync::Arc;

use anyhow::bail;
use polaris_framework::{
    CheckConflictsPlugin, FilterPlugin, NodeInfo, Plugin, PluginConfig, PluginConfigExt, PodInfo,
    PreFilterPlugin, Resources, SchedulingContext, SchedulingDecision, ScorePlugin, StageResult,
    Status,
};

pub const RESOURCES_FIT: &str = "ResourcesFit";

/// Plugin config key selecting the [`ScoringMode`].
pub const SCORING_MODE_KEY: &str = "scoringMode";

const STATE_KEY: &str = "ResourcesFit.state";

/// How the Score stage rates a node's utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScoringMode {
    /// Prefer nodes with little of their resources in use.
    #[default]
    LeastAllocated,
    /// Prefer nodes that are already well used.
    MostAllocated,
}

impl ScoringMode {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "LeastAllocated" => Ok(Self::LeastAllocated),
            "MostAllocated" => Ok(Self::MostAllocated),
            other => bail!("invalid value for {RESOURCES_FIT}.{SCORING_MODE_KEY}: {other}"),
        }
    }
}

/// Resources requested by the pod being scheduled.
#[derive(Debug)]
struct ResourcesFitState {
    requested: Resources,
}

#[derive(Debug, Default)]
pub struct ResourcesFit {
    scoring_mode: ScoringMode,
}

impl ResourcesFit {
    pub fn new(scoring_mode: ScoringMode) -> Self {
        Self { scoring_mode }
    }

    pub fn from_config(config: Option<&PluginConfig>) -> anyhow::Result<Self> {
        let scoring_mode = match config.and_then(|c| c.read_string(SCORING_MODE_KEY)) {
            Some(mode) => ScoringMode::parse(mode)?,
            None => ScoringMode::default(),
        };
        Ok(Self::new(scoring_mode))
    }

    pub fn scoring_mode(&self) -> ScoringMode {
        self.scoring_mode
    }

    fn read_state(&self, ctx: &SchedulingContext) -> StageResult<Arc<ResourcesFitState>> {
        ctx.read::<ResourcesFitState>(STATE_KEY)
            .ok_or_else(|| Status::internal_error(anyhow::anyhow!("{STATE_KEY} not found")))
    }
}

impl Plugin for ResourcesFit {
    fn name(&self) -> &str {
        RESOURCES_FIT
    }

    fn as_pre_filter(self: Arc<Self>) -> Option<Arc<dyn PreFilterPlugin>> {
        Some(self)
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn FilterPlugin>> {
        Some(self)
    }

    fn as_score(self: Arc<Self>) -> Option<Arc<dyn ScorePlugin>> {
        Some(self)
    }

    fn as_check_conflicts(self: Arc<Self>) -> Option<Arc<dyn CheckConflictsPlugin>> {
        Some(self)
    }
}

impl PreFilterPlugin for ResourcesFit {
    fn pre_filter(&self, ctx: &SchedulingContext, pod: &PodInfo) -> StageResult {
        ctx.write(
            STATE_KEY,
            ResourcesFitState {
                requested: pod.pod.total_resources(),
            },
        );
        Ok(())
    }
}

impl FilterPlugin for ResourcesFit {
    fn filter(&self, ctx: &SchedulingContext, _: &PodInfo, node: &NodeInfo) -> StageResult {
        let state = self.read_state(ctx)?;
        if state
            .requested
            .less_than_or_equal(&node.node.available_resources)
        {
            Ok(())
        } else {
            Err(Status::unschedulable(format!(
                "node {} does not have enough resources",
                node.name()
            )))
        }
    }
}

impl ScorePlugin for ResourcesFit {
    fn score(&self, ctx: &SchedulingContext, _: &PodInfo, node: &NodeInfo) -> StageResult<i64> {
        let state = self.read_state(ctx)?;
        let used = used_percentage(&state.requested, node);
        Ok(match self.scoring_mode {
            ScoringMode::LeastAllocated => 100 - used,
            ScoringMode::MostAllocated => used,
        })
    }
}

impl CheckConflictsPlugin for ResourcesFit {
    fn check_for_conflicts(
        &self,
        ctx: &SchedulingContext,
        decision: &SchedulingDecision,
    ) -> StageResult {
        self.pre_filter(ctx, &decision.pod)?;
        self.filter(ctx, &decision.pod, &decision.target_node)
    }
}

/// Share of the node's resources in use, as an integer in `0..=100`.
///
/// CPU and memory always count. Ephemeral storage and extended resources
/// only count when the pod requests them.
fn used_percentage(requested: &Resources, node: &NodeInfo) -> i64 {
    let total = &node.node.total_resources;
    let available = &node.node.available_resources;

    let mut sum = used_fraction(total.milli_cpu, available.milli_cpu)
        + used_fraction(total.memory_bytes, available.memory_bytes);
    let mut count = 2.0;

    if requested.ephemeral_storage > 0 {
        sum += used_fraction(total.ephemeral_storage, available.ephemeral_storage);
        count += 1.0;
    }
    for name in requested.extended.keys() {
        let total = total.extended.get(name).copied().unwrap_or(0);
        let available = available.extended.get(name).copied().unwrap_or(0);
        sum += used_fraction(total, available);
        count += 1.0;
    }

    ((sum / count) * 100.0).floor().clamp(0.0, 100.0) as i64
}

/// A resource the node does not have at all counts as fully used.
fn used_fraction(total: i64, available: i64) -> f64 {
    if total <= 0 {
        return 1.0;
    }
    total.saturating_sub(available) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_framework::status::MAX_NODE_SCORE;
    use polaris_framework::{ClusterNode, ClusterPod, Container, Node, Pod, Quantity, StatusCode};
    use serde_json::json;

    fn node(name: &str, cpu_milli: i64, memory: i64, pods: &[&Pod]) -> NodeInfo {
        let mut node = Node::new(name);
        node.status
            .allocatable
            .insert("cpu".into(), Quantity::from_milli(cpu_milli));
        node.status
            .allocatable
            .insert("memory".into(), Quantity::from_value(memory));
        let pods = pods.iter().map(|p| Arc::new(ClusterPod::from_pod(p))).collect();
        NodeInfo::new("c1", Arc::new(ClusterNode::with_pods(node, pods, Vec::new())))
    }

    fn pod(name: &str, cpu_milli: i64, memory: i64) -> Pod {
        let mut pod = Pod::new("default", name);
        let mut container = Container {
            name: "main".into(),
            ..Default::default()
        };
        container
            .resources
            .limits
            .insert("cpu".into(), Quantity::from_milli(cpu_milli));
        container
            .resources
            .limits
            .insert("memory".into(), Quantity::from_value(memory));
        pod.spec.containers.push(container);
        pod
    }

    fn prefiltered(plugin: &ResourcesFit, pod: &Pod) -> (SchedulingContext, PodInfo) {
        let ctx = SchedulingContext::default();
        let info = PodInfo::new(pod.clone());
        plugin.pre_filter(&ctx, &info).unwrap();
        (ctx, info)
    }

    #[test]
    fn filter_rejects_nodes_without_room() {
        let plugin = ResourcesFit::default();
        let (ctx, info) = prefiltered(&plugin, &pod("p", 1500, 1024));

        let big = node("big", 4000, 4096, &[]);
        let small = node("small", 1000, 4096, &[]);
        assert!(plugin.filter(&ctx, &info, &big).is_ok());

        let err = plugin.filter(&ctx, &info, &small).unwrap_err();
        assert_eq!(err.code(), StatusCode::Unschedulable);
        assert!(err.message().contains("node small does not have enough resources"));
    }

    #[test]
    fn filter_without_pre_filter_is_an_internal_error() {
        let plugin = ResourcesFit::default();
        let info = PodInfo::new(pod("p", 100, 1));
        let err = plugin
            .filter(&SchedulingContext::default(), &info, &node("n", 1000, 10, &[]))
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::InternalError);
    }

    #[test]
    fn least_allocated_prefers_idle_nodes() {
        let plugin = ResourcesFit::default();
        let (ctx, info) = prefiltered(&plugin, &pod("p", 100, 1));

        let busy_pod = pod("busy", 2000, 2048);
        let idle = node("idle", 4000, 4096, &[]);
        let busy = node("busy", 4000, 4096, &[&busy_pod]);

        assert_eq!(plugin.score(&ctx, &info, &idle).unwrap(), MAX_NODE_SCORE);
        assert_eq!(plugin.score(&ctx, &info, &busy).unwrap(), 50);
    }

    #[test]
    fn most_allocated_prefers_busy_nodes() {
        let config = json!({ "scoringMode": "MostAllocated" });
        let plugin = ResourcesFit::from_config(Some(&config)).unwrap();
        assert_eq!(plugin.scoring_mode(), ScoringMode::MostAllocated);
        let (ctx, info) = prefiltered(&plugin, &pod("p", 100, 1));

        let busy_pod = pod("busy", 3000, 1024);
        let busy = node("busy", 4000, 4096, &[&busy_pod]);
        // cpu 75% used, memory 25% used
        assert_eq!(plugin.score(&ctx, &info, &busy).unwrap(), 50);
    }

    #[test]
    fn overcommitted_nodes_score_as_fully_used() {
        let huge = pod("huge", i64::MAX, 1);
        let overcommitted = node("over", 4000, 4096, &[&huge, &huge]);
        assert_eq!(overcommitted.node.available_resources.milli_cpu, i64::MIN);

        let plugin = ResourcesFit::default();
        let (ctx, info) = prefiltered(&plugin, &pod("p", 100, 1));
        assert_eq!(plugin.score(&ctx, &info, &overcommitted).unwrap(), 0);
        assert!(plugin.filter(&ctx, &info, &overcommitted).is_err());

        let plugin = ResourcesFit::new(ScoringMode::MostAllocated);
        let (ctx, info) = prefiltered(&plugin, &pod("p", 100, 1));
        assert_eq!(plugin.score(&ctx, &info, &overcommitted).unwrap(), MAX_NODE_SCORE);
    }

    #[test]
    fn invalid_scoring_mode_is_rejected() {
        let config = json!({ "scoringMode": "Random" });
        let err = ResourcesFit::from_config(Some(&config)).unwrap_err();
        assert!(err.to_string().contains("ResourcesFit.scoringMode: Random"));
    }

    #[test]
    fn conflicts_are_found_on_fresh_node_state() {
        let plugin = ResourcesFit::default();
        let ctx = SchedulingContext::default();
        let incoming = pod("incoming", 1000, 512);
        let other = pod("other", 3500, 512);

        let decision = |target: NodeInfo| SchedulingDecision {
            pod: Arc::new(PodInfo::new(incoming.clone())),
            target_node: target,
        };
        assert!(
            plugin
                .check_for_conflicts(&ctx, &decision(node("n1", 4000, 4096, &[])))
                .is_ok()
        );
        let err = plugin
            .check_for_conflicts(&ctx, &decision(node("n1", 4000, 4096, &[&other])))
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::Unschedulable);
    }
}
