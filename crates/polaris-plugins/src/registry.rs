//! Registries preloaded with the built-in plugins.

use std::sync::Arc;

use polaris_framework::{ClusterAgentServices, Plugin, PluginsRegistry, SchedulerServices};

use crate::priority_sort::{PRIORITY_SORT, PrioritySort};
use crate::random_sampling::{RANDOM_SAMPLING_STRATEGY, RandomSamplingStrategy};
use crate::remote_nodes_sampler::{REMOTE_NODES_SAMPLER, RemoteNodesSampler};
use crate::resources_fit::{RESOURCES_FIT, ResourcesFit};
use crate::round_robin_sampling::{ROUND_ROBIN_SAMPLING_STRATEGY, RoundRobinSamplingStrategy};

/// Plugins available to the scheduler.
pub fn default_scheduler_registry() -> PluginsRegistry<SchedulerServices> {
    let mut registry = PluginsRegistry::new();
    registry
        .register(PRIORITY_SORT, |_, _: &SchedulerServices| {
            Ok(Arc::new(PrioritySort) as Arc<dyn Plugin>)
        })
        .register(RESOURCES_FIT, |config, _: &SchedulerServices| {
            Ok(Arc::new(ResourcesFit::from_config(config)?) as Arc<dyn Plugin>)
        })
        .register(REMOTE_NODES_SAMPLER, |config, services: &SchedulerServices| {
            Ok(Arc::new(RemoteNodesSampler::new(config, services)?) as Arc<dyn Plugin>)
        });
    registry
}

/// Plugins available to a cluster agent's sampling and binding pipelines.
pub fn default_cluster_agent_registry() -> PluginsRegistry<ClusterAgentServices> {
    let mut registry = PluginsRegistry::new();
    registry
        .register(RESOURCES_FIT, |config, _: &ClusterAgentServices| {
            Ok(Arc::new(ResourcesFit::from_config(config)?) as Arc<dyn Plugin>)
        })
        .register(RANDOM_SAMPLING_STRATEGY, |_, services: &ClusterAgentServices| {
            Ok(Arc::new(RandomSamplingStrategy::new(services)) as Arc<dyn Plugin>)
        })
        .register(ROUND_ROBIN_SAMPLING_STRATEGY, |_, services: &ClusterAgentServices| {
            Ok(Arc::new(RoundRobinSamplingStrategy::new(services)) as Arc<dyn Plugin>)
        });
    registry
}
