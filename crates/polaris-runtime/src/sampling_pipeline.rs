//! The cluster agent's sampling pipeline.
//!
//! ```text
//! PreFilter ─▶ ┌ SamplingStrategy ─▶ Filter ┐ ─▶ PreScore ─▶ Score
//!              └──── top up (≤ 4 extra) ◀───┘
//! ```
//!
//! The strategy is asked for the missing number of nodes until enough nodes
//! survive filtering or the iteration limit is reached.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use polaris_framework::config::MAX_BASIS_POINTS;
use polaris_framework::status::SAMPLING_STRATEGY_STAGE;
use polaris_framework::{
    NodeInfo, NodesCache, PodInfo, SamplingPipelinePlugins, SamplingScore,
    SamplingStrategyPlugin, SchedulingContext, StageResult, Status, StatusCode,
};
use tracing::debug;

use crate::stages::{
    NO_CANDIDATES_LEFT, run_filter_plugins, run_pre_filter_plugins, run_pre_score_plugins,
    run_score_plugins, weighted_totals,
};

/// Extra sampling rounds after the first one.
pub const MAX_SAMPLING_LOOP_ITERATIONS: usize = 4;

/// `ceil(total × bp / 10000)`, at least 1.
pub fn sample_size(total_nodes: usize, nodes_to_sample_bp: u32) -> usize {
    let bp = u128::from(nodes_to_sample_bp);
    let max = u128::from(MAX_BASIS_POINTS);
    let size = (total_nodes as u128 * bp).div_ceil(max);
    usize::try_from(size).unwrap_or(usize::MAX).max(1)
}

pub struct SamplingPipeline {
    id: usize,
    plugins: SamplingPipelinePlugins,
    nodes_cache: Arc<dyn NodesCache>,
}

impl SamplingPipeline {
    pub fn new(id: usize, plugins: SamplingPipelinePlugins, nodes_cache: Arc<dyn NodesCache>) -> Self {
        Self {
            id,
            plugins,
            nodes_cache,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Sample `nodes_to_sample_bp` basis points of the cached nodes with
    /// `strategy` and return the eligible ones. When score plugins are
    /// configured, every returned node carries its [`SamplingScore`].
    pub fn sample_nodes(
        &self,
        ctx: &SchedulingContext,
        strategy: &dyn SamplingStrategyPlugin,
        pod: &PodInfo,
        nodes_to_sample_bp: u32,
    ) -> StageResult<Vec<NodeInfo>> {
        let started = Instant::now();
        let total_nodes = self.nodes_cache.nodes().read_lock().len();
        let size = sample_size(total_nodes, nodes_to_sample_bp);

        let result = self.run(ctx, strategy, pod, size);
        debug!(
            pipeline = self.id,
            pod = %pod.pod.key(),
            strategy = %strategy.strategy_name(),
            sample_size = size,
            eligible_nodes = result.as_ref().map_or(0, Vec::len),
            success = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "pod traversed sampling pipeline"
        );
        result
    }

    fn run(
        &self,
        ctx: &SchedulingContext,
        strategy: &dyn SamplingStrategyPlugin,
        pod: &PodInfo,
        size: usize,
    ) -> StageResult<Vec<NodeInfo>> {
        run_pre_filter_plugins(&self.plugins.pre_filter, ctx, pod)?;

        let mut eligible = self.sample_and_filter(ctx, strategy, pod, size)?;

        run_pre_score_plugins(&self.plugins.pre_score, ctx, pod, &eligible)?;
        let scores = run_score_plugins(&self.plugins.score, ctx, pod, &eligible)?;
        if !self.plugins.score.is_empty() {
            let totals = weighted_totals(&self.plugins.score, &scores, eligible.len());
            for (node, total) in eligible.iter_mut().zip(totals) {
                node.sampling_score = Some(SamplingScore {
                    accumulated_score: total,
                    score_plugins_count: self.plugins.score.len(),
                });
            }
        }
        Ok(eligible)
    }

    fn sample_and_filter(
        &self,
        ctx: &SchedulingContext,
        strategy: &dyn SamplingStrategyPlugin,
        pod: &PodInfo,
        size: usize,
    ) -> StageResult<Vec<NodeInfo>> {
        let mut eligible: Vec<NodeInfo> = Vec::with_capacity(size);
        let mut seen: HashSet<String> = HashSet::with_capacity(size);

        let mut iteration = 0;
        while eligible.len() < size && iteration <= MAX_SAMPLING_LOOP_ITERATIONS {
            iteration += 1;
            let missing = size - eligible.len();
            let sample = strategy
                .sample_nodes(ctx, pod, missing)
                .map_err(|status| status.with_failed_plugin(strategy.name(), SAMPLING_STRATEGY_STAGE))?;
            let fresh: Vec<NodeInfo> = sample
                .into_iter()
                .filter(|node| !seen.contains(node.name()))
                .collect();
            if fresh.is_empty() {
                break;
            }
            seen.extend(fresh.iter().map(|node| node.name().to_string()));

            match run_filter_plugins(&self.plugins.filter, ctx, pod, fresh) {
                Ok(survivors) => eligible.extend(survivors),
                // Nothing in this round survived; try another one.
                Err(status) if status.code() == StatusCode::Unschedulable => {}
                Err(status) => return Err(status),
            }
        }

        if eligible.is_empty() {
            return Err(Status::unschedulable(NO_CANDIDATES_LEFT));
        }
        Ok(eligible)
    }
}
