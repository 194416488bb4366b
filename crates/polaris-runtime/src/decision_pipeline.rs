//! The scheduler's decision pipeline.
//!
//! One instance handles one pod at a time:
//!
//! ```text
//! sampled nodes ─▶ PreFilter ─▶ Filter ─▶ PreScore ─▶ Score ─▶ pick ─▶ Reserve
//! ```
//!
//! The node with the highest weighted score sum wins; ties are broken
//! uniformly at random.

use std::sync::{Mutex, PoisonError};

use polaris_framework::status::RESERVE_STAGE;
use polaris_framework::{
    DecisionPipelinePlugins, NodeInfo, QueuedPodInfo, SchedulingContext, SchedulingDecision,
    StageResult, Status,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::stages::{
    NO_CANDIDATES_LEFT, run_filter_plugins, run_pre_filter_plugins, run_pre_score_plugins,
    run_score_plugins, weighted_totals,
};

pub struct DecisionPipeline {
    id: usize,
    plugins: DecisionPipelinePlugins,
    // Only used for tie-breaking.
    rng: Mutex<StdRng>,
}

impl DecisionPipeline {
    pub fn new(id: usize, plugins: DecisionPipelinePlugins) -> Self {
        Self {
            id,
            plugins,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a pipeline with a deterministic tie-breaker.
    pub fn with_seed(id: usize, plugins: DecisionPipelinePlugins, seed: u64) -> Self {
        Self {
            id,
            plugins,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Pick a node for `pod` among `candidates` and reserve it.
    pub fn schedule_pod(
        &self,
        pod: &QueuedPodInfo,
        candidates: Vec<NodeInfo>,
    ) -> StageResult<SchedulingDecision> {
        let ctx = &pod.ctx;
        let pod_info = &pod.pod_info;

        run_pre_filter_plugins(&self.plugins.pre_filter, ctx, pod_info)?;
        let eligible = run_filter_plugins(&self.plugins.filter, ctx, pod_info, candidates)?;
        if eligible.is_empty() {
            return Err(Status::unschedulable(NO_CANDIDATES_LEFT));
        }

        run_pre_score_plugins(&self.plugins.pre_score, ctx, pod_info, &eligible)?;
        let scores = run_score_plugins(&self.plugins.score, ctx, pod_info, &eligible)?;
        let totals = weighted_totals(&self.plugins.score, &scores, eligible.len());

        let winner = self.pick_winner(&totals);
        let score = totals[winner];
        let Some(target_node) = eligible.into_iter().nth(winner) else {
            return Err(Status::internal_error(anyhow::anyhow!(
                "winning node index {winner} out of range"
            )));
        };
        debug!(
            pipeline = self.id,
            pod = %pod.key(),
            node = %target_node.name(),
            cluster = %target_node.cluster_name,
            score,
            "node selected"
        );

        let decision = SchedulingDecision {
            pod: pod_info.clone(),
            target_node,
        };
        self.reserve(ctx, &decision)?;
        Ok(decision)
    }

    /// Index of the highest total. Ties are resolved uniformly at random.
    fn pick_winner(&self, totals: &[i64]) -> usize {
        let Some(max) = totals.iter().copied().max() else {
            return 0;
        };
        let tied: Vec<usize> = totals
            .iter()
            .enumerate()
            .filter(|(_, total)| **total == max)
            .map(|(i, _)| i)
            .collect();
        if tied.len() == 1 {
            return tied[0];
        }
        let pick = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..tied.len());
        tied[pick]
    }

    /// Run every reserve plugin. On the first failure, every reserve plugin
    /// is unreserved, including those whose reserve never ran.
    fn reserve(&self, ctx: &SchedulingContext, decision: &SchedulingDecision) -> StageResult {
        let pod = &decision.pod;
        let target = &decision.target_node;
        for plugin in &self.plugins.reserve {
            if let Err(status) = plugin.reserve(ctx, pod, target) {
                for reserve in &self.plugins.reserve {
                    reserve.unreserve(ctx, pod, target);
                }
                return Err(status.with_failed_plugin(plugin.name(), RESERVE_STAGE));
            }
        }
        Ok(())
    }
}
