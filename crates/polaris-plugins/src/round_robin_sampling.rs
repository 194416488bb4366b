//! Hands out consecutive windows of the nodes cache, wrapping around at the
//! end.

use std::sync::{Arc, Mutex, PoisonError};

use polaris_framework::{
    ClusterAgentServices, NodeInfo, NodesCache, Plugin, PodInfo, SamplingStrategyPlugin,
    SchedulingContext, StageResult,
};

pub const ROUND_ROBIN_SAMPLING_STRATEGY: &str = "RoundRobinSamplingStrategy";
pub const ROUND_ROBIN_STRATEGY_NAME: &str = "round-robin";

pub struct RoundRobinSamplingStrategy {
    cluster_name: String,
    nodes_cache: Arc<dyn NodesCache>,
    /// Index of the last node handed out, `None` before the first sample.
    last_index: Mutex<Option<usize>>,
}

impl RoundRobinSamplingStrategy {
    pub fn new(services: &ClusterAgentServices) -> Self {
        Self::with_cache(services.cluster_name(), services.nodes_cache.clone())
    }

    pub fn with_cache(cluster_name: impl Into<String>, nodes_cache: Arc<dyn NodesCache>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            nodes_cache,
            last_index: Mutex::new(None),
        }
    }

    /// Reserve the next window of `size` positions in a store of `total`
    /// nodes and return its first position.
    fn next_window(&self, size: usize, total: usize) -> usize {
        let mut last = self
            .last_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The store may have shrunk since the last call.
        let start = last.map_or(0, |l| (l + 1) % total);
        *last = Some((start + size - 1) % total);
        start
    }
}

impl Plugin for RoundRobinSamplingStrategy {
    fn name(&self) -> &str {
        ROUND_ROBIN_SAMPLING_STRATEGY
    }

    fn as_sampling_strategy(self: Arc<Self>) -> Option<Arc<dyn SamplingStrategyPlugin>> {
        Some(self)
    }
}

impl SamplingStrategyPlugin for RoundRobinSamplingStrategy {
    fn strategy_name(&self) -> &str {
        ROUND_ROBIN_STRATEGY_NAME
    }

    fn sample_nodes(
        &self,
        _: &SchedulingContext,
        _: &PodInfo,
        sample_size: usize,
    ) -> StageResult<Vec<NodeInfo>> {
        let reader = self.nodes_cache.nodes().read_lock();
        let total = reader.len();
        let size = sample_size.min(total);
        if size == 0 {
            return Ok(Vec::new());
        }

        let start = self.next_window(size, total);
        Ok((0..size)
            .filter_map(|offset| reader.get_by_index((start + offset) % total))
            .map(|(_, node)| NodeInfo::new(self.cluster_name.as_str(), node.clone()))
            .collect())
    }
}
