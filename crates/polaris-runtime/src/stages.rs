//! Stage runners shared by the decision and sampling pipelines.
//!
//! Each runner executes the plugins of one stage in order and stops at the
//! first non-success status, which it tags with the failing plugin and
//! stage.

use std::sync::Arc;

use polaris_framework::status::{FILTER_STAGE, PRE_FILTER_STAGE, PRE_SCORE_STAGE, SCORE_STAGE};
use polaris_framework::{
    FilterPlugin, NodeInfo, NodeScore, PodInfo, PreFilterPlugin, PreScorePlugin,
    SchedulingContext, StageResult, Status, StatusCode, WeightedScorePlugin,
};

pub const NO_CANDIDATES_LEFT: &str = "no candidates left after Filter plugins";

pub fn run_pre_filter_plugins(
    plugins: &[Arc<dyn PreFilterPlugin>],
    ctx: &SchedulingContext,
    pod: &PodInfo,
) -> StageResult {
    for plugin in plugins {
        plugin
            .pre_filter(ctx, pod)
            .map_err(|status| status.with_failed_plugin(plugin.name(), PRE_FILTER_STAGE))?;
    }
    Ok(())
}

/// Run every filter plugin over the candidates. A node rejected by any
/// plugin is dropped and not offered to later plugins. An `InternalError`
/// aborts the pod. Fails with `Unschedulable` once no candidate is left.
pub fn run_filter_plugins(
    plugins: &[Arc<dyn FilterPlugin>],
    ctx: &SchedulingContext,
    pod: &PodInfo,
    mut candidates: Vec<NodeInfo>,
) -> StageResult<Vec<NodeInfo>> {
    for plugin in plugins {
        let mut eligible = Vec::with_capacity(candidates.len());
        for node in candidates {
            match plugin.filter(ctx, pod, &node) {
                Ok(()) => eligible.push(node),
                Err(status) => match status.code() {
                    StatusCode::Success => eligible.push(node),
                    StatusCode::Unschedulable => {}
                    StatusCode::InternalError => {
                        return Err(status.with_failed_plugin(plugin.name(), FILTER_STAGE));
                    }
                },
            }
        }
        if eligible.is_empty() {
            return Err(
                Status::unschedulable(NO_CANDIDATES_LEFT).with_failed_plugin(plugin.name(), FILTER_STAGE)
            );
        }
        candidates = eligible;
    }
    Ok(candidates)
}

pub fn run_pre_score_plugins(
    plugins: &[Arc<dyn PreScorePlugin>],
    ctx: &SchedulingContext,
    pod: &PodInfo,
    eligible_nodes: &[NodeInfo],
) -> StageResult {
    for plugin in plugins {
        plugin
            .pre_score(ctx, pod, eligible_nodes)
            .map_err(|status| status.with_failed_plugin(plugin.name(), PRE_SCORE_STAGE))?;
    }
    Ok(())
}

/// Score every eligible node with every plugin. `result[p][n]` is the
/// (normalized, unweighted) score of plugin `p` for node `n`.
pub fn run_score_plugins(
    plugins: &[WeightedScorePlugin],
    ctx: &SchedulingContext,
    pod: &PodInfo,
    eligible_nodes: &[NodeInfo],
) -> StageResult<Vec<Vec<NodeScore>>> {
    plugins
        .iter()
        .map(|weighted| {
            run_score_plugin(weighted, ctx, pod, eligible_nodes)
                .map_err(|status| status.with_failed_plugin(weighted.plugin.name(), SCORE_STAGE))
        })
        .collect()
}

fn run_score_plugin(
    weighted: &WeightedScorePlugin,
    ctx: &SchedulingContext,
    pod: &PodInfo,
    eligible_nodes: &[NodeInfo],
) -> StageResult<Vec<NodeScore>> {
    let plugin = &weighted.plugin;
    let mut scores = eligible_nodes
        .iter()
        .map(|node| -> StageResult<NodeScore> {
            Ok(NodeScore {
                node: node.clone(),
                score: plugin.score(ctx, pod, node)?,
            })
        })
        .collect::<StageResult<Vec<_>>>()?;

    if let Some(extensions) = plugin.score_extensions() {
        extensions.normalize_scores(ctx, pod, &mut scores)?;
    }
    Ok(scores)
}

/// Weighted sum of all plugins' scores per node, in node order.
pub fn weighted_totals(plugins: &[WeightedScorePlugin], all_scores: &[Vec<NodeScore>], nodes: usize) -> Vec<i64> {
    let mut totals = vec![0i64; nodes];
    for (plugin, scores) in plugins.iter().zip(all_scores) {
        for (total, score) in totals.iter_mut().zip(scores) {
            *total = total.saturating_add(score.score.saturating_mul(plugin.weight));
        }
    }
    totals
}

#[cfg(test)]
pub(crate) mod testing {
    //! Configurable stage plugins for pipeline tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use polaris_framework::{
        ClusterNode, Node, NodeInfo, NodeScore, Plugin, PodInfo, ReservePlugin, ScoreExtensions,
        ScorePlugin, SchedulingContext, StageResult, Status, scoring::normalize_scores_generic,
    };
    use polaris_framework::{FilterPlugin, PreFilterPlugin};
    use std::sync::Arc;

    pub fn node(cluster: &str, name: &str) -> NodeInfo {
        NodeInfo::new(cluster, Arc::new(ClusterNode::new(Node::new(name))))
    }

    /// Rejects the listed nodes; fails internally on `boom`.
    pub struct RejectNodes {
        pub name: &'static str,
        pub rejected: Vec<&'static str>,
        pub calls: AtomicUsize,
    }

    impl RejectNodes {
        pub fn new(name: &'static str, rejected: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                rejected,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Plugin for RejectNodes {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl FilterPlugin for RejectNodes {
        fn filter(&self, _: &SchedulingContext, _: &PodInfo, node: &NodeInfo) -> StageResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if node.name() == "boom" {
                return Err(Status::internal_error(anyhow::anyhow!("filter exploded")));
            }
            if self.rejected.iter().any(|r| *r == node.name()) {
                return Err(Status::unschedulable(format!("{} rejected", node.name())));
            }
            Ok(())
        }
    }

    impl PreFilterPlugin for RejectNodes {
        fn pre_filter(&self, _: &SchedulingContext, _: &PodInfo) -> StageResult {
            if self.rejected.contains(&"*") {
                return Err(Status::unschedulable("pod rejected"));
            }
            Ok(())
        }
    }

    /// Returns a fixed score per node name.
    pub struct FixedScores {
        pub name: &'static str,
        pub scores: HashMap<&'static str, i64>,
        pub normalize: bool,
    }

    impl FixedScores {
        pub fn new(name: &'static str, scores: &[(&'static str, i64)]) -> Arc<Self> {
            Arc::new(Self {
                name,
                scores: scores.iter().copied().collect(),
                normalize: false,
            })
        }
    }

    impl Plugin for FixedScores {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl ScorePlugin for FixedScores {
        fn score(&self, _: &SchedulingContext, _: &PodInfo, node: &NodeInfo) -> StageResult<i64> {
            Ok(self.scores.get(node.name()).copied().unwrap_or(0))
        }

        fn score_extensions(&self) -> Option<&dyn ScoreExtensions> {
            self.normalize.then_some(self as &dyn ScoreExtensions)
        }
    }

    impl ScoreExtensions for FixedScores {
        fn normalize_scores(
            &self,
            _: &SchedulingContext,
            _: &PodInfo,
            scores: &mut [NodeScore],
        ) -> StageResult {
            normalize_scores_generic(scores);
            Ok(())
        }
    }

    /// Records reserve/unreserve calls; fails reserve if `fail` is set.
    pub struct RecordingReserve {
        pub name: &'static str,
        pub fail: bool,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for RecordingReserve {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl ReservePlugin for RecordingReserve {
        fn reserve(&self, _: &SchedulingContext, _: &PodInfo, target: &NodeInfo) -> StageResult {
            self.log
                .lock()
                .unwrap()
                .push(format!("reserve {} {}", self.name, target.name()));
            if self.fail {
                return Err(Status::unschedulable("reservation rejected"));
            }
            Ok(())
        }

        fn unreserve(&self, _: &SchedulingContext, _: &PodInfo, target: &NodeInfo) {
            self.log
                .lock()
                .unwrap()
                .push(format!("unreserve {} {}", self.name, target.name()));
        }
    }
}
