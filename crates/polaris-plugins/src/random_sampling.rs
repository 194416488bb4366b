//! Samples distinct nodes uniformly at random from the nodes cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use polaris_framework::{
    ClusterAgentServices, NodeInfo, NodesCache, Plugin, PodInfo, SamplingStrategyPlugin,
    SchedulingContext, StageResult,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub const RANDOM_SAMPLING_STRATEGY: &str = "RandomSamplingStrategy";
pub const RANDOM_STRATEGY_NAME: &str = "random";

/// Number of independently seeded generators shared by concurrent callers.
const RNG_POOL_SIZE: usize = 100;

pub struct RandomSamplingStrategy {
    cluster_name: String,
    nodes_cache: Arc<dyn NodesCache>,
    rngs: Vec<Mutex<StdRng>>,
    next_rng: AtomicUsize,
}

impl RandomSamplingStrategy {
    pub fn new(services: &ClusterAgentServices) -> Self {
        Self::with_cache(services.cluster_name(), services.nodes_cache.clone())
    }

    pub fn with_cache(cluster_name: impl Into<String>, nodes_cache: Arc<dyn NodesCache>) -> Self {
        let rngs = (0..RNG_POOL_SIZE)
            .map(|_| Mutex::new(StdRng::from_entropy()))
            .collect();
        Self {
            cluster_name: cluster_name.into(),
            nodes_cache,
            rngs,
            next_rng: AtomicUsize::new(0),
        }
    }
}

impl Plugin for RandomSamplingStrategy {
    fn name(&self) -> &str {
        RANDOM_SAMPLING_STRATEGY
    }

    fn as_sampling_strategy(self: Arc<Self>) -> Option<Arc<dyn SamplingStrategyPlugin>> {
        Some(self)
    }
}

impl SamplingStrategyPlugin for RandomSamplingStrategy {
    fn strategy_name(&self) -> &str {
        RANDOM_STRATEGY_NAME
    }

    fn sample_nodes(
        &self,
        _: &SchedulingContext,
        _: &PodInfo,
        sample_size: usize,
    ) -> StageResult<Vec<NodeInfo>> {
        let reader = self.nodes_cache.nodes().read_lock();
        let total = reader.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let slot = self.next_rng.fetch_add(1, Ordering::Relaxed) % self.rngs.len();
        let indices = {
            let mut rng = self.rngs[slot]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            rand::seq::index::sample(&mut *rng, total, sample_size.min(total))
        };

        Ok(indices
            .into_iter()
            .filter_map(|i| reader.get_by_index(i))
            .map(|(_, node)| NodeInfo::new(self.cluster_name.as_str(), node.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::cache_with_nodes;
    use std::collections::HashSet;

    fn sample(strategy: &RandomSamplingStrategy, size: usize) -> Vec<String> {
        let pod = PodInfo::new(polaris_framework::Pod::new("default", "p"));
        strategy
            .sample_nodes(&SchedulingContext::default(), &pod, size)
            .unwrap()
            .iter()
            .map(|n| n.name().to_string())
            .collect()
    }

    #[test]
    fn samples_distinct_nodes() {
        let strategy = RandomSamplingStrategy::with_cache("c1", cache_with_nodes(50));
        for _ in 0..20 {
            let names = sample(&strategy, 10);
            assert_eq!(names.len(), 10);
            assert_eq!(names.iter().collect::<HashSet<_>>().len(), 10);
        }
    }

    #[test]
    fn oversized_sample_returns_every_node_once() {
        let strategy = RandomSamplingStrategy::with_cache("c1", cache_with_nodes(7));
        let names = sample(&strategy, 100);
        assert_eq!(names.len(), 7);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 7);
    }

    #[test]
    fn empty_cache_yields_no_nodes() {
        let strategy = RandomSamplingStrategy::with_cache("c1", cache_with_nodes(0));
        assert!(sample(&strategy, 5).is_empty());
    }

    #[test]
    fn nodes_carry_the_cluster_name() {
        let strategy = RandomSamplingStrategy::with_cache("edge-1", cache_with_nodes(3));
        let pod = PodInfo::new(polaris_framework::Pod::new("default", "p"));
        let nodes = strategy
            .sample_nodes(&SchedulingContext::default(), &pod, 2)
            .unwrap();
        assert!(nodes.iter().all(|n| n.cluster_name == "edge-1"));
    }
}
