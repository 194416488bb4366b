//! The cluster agent's node sampler: the shared sampling strategies plus a
//! pool of sampling pipelines that serve remote sampling requests.

use std::sync::Arc;

use polaris_cluster::{RemoteNodesSamplerRequest, RemoteNodesSamplerResponse};
use polaris_framework::{
    ClusterAgentServices, NodesCache, PluginsRegistry, SamplingStrategyPlugin, SchedulingContext,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{RuntimeError, RuntimeResult};
use crate::pipeline_pool::PipelinePool;
use crate::plugin_factories::{new_sampling_pipeline_plugins, new_sampling_strategies};
use crate::sampling_pipeline::SamplingPipeline;

pub struct NodeSamplerService {
    strategies: Vec<Arc<dyn SamplingStrategyPlugin>>,
    pipelines: PipelinePool<SamplingPipeline>,
    nodes_cache: Arc<dyn NodesCache>,
}

impl NodeSamplerService {
    /// Create the sampling strategies and `parallelSamplingPipelines`
    /// sampling pipelines.
    pub fn new(
        registry: &PluginsRegistry<ClusterAgentServices>,
        services: &ClusterAgentServices,
    ) -> RuntimeResult<Self> {
        let strategies = new_sampling_strategies(registry, services)?;
        let count = services.config.parallel_sampling_pipelines;
        let pipelines = (0..count)
            .map(|id| {
                let plugins = new_sampling_pipeline_plugins(registry, services)?;
                Ok(SamplingPipeline::new(id, plugins, services.nodes_cache.clone()))
            })
            .collect::<RuntimeResult<Vec<_>>>()?;

        info!(
            cluster = %services.cluster_name(),
            pipelines = count,
            strategies = ?strategies.iter().map(|s| s.strategy_name()).collect::<Vec<_>>(),
            "node sampler created"
        );
        Ok(Self {
            strategies,
            pipelines: PipelinePool::new(pipelines),
            nodes_cache: services.nodes_cache.clone(),
        })
    }

    pub fn strategies(&self) -> &[Arc<dyn SamplingStrategyPlugin>] {
        &self.strategies
    }

    pub fn strategy(&self, name: &str) -> Option<&Arc<dyn SamplingStrategyPlugin>> {
        self.strategies.iter().find(|s| s.strategy_name() == name)
    }

    pub fn nodes_count(&self) -> usize {
        self.nodes_cache.nodes().read_lock().len()
    }

    /// Sample nodes with the strategy called `strategy_name` on the next
    /// free sampling pipeline.
    pub async fn sample_nodes(
        &self,
        strategy_name: &str,
        request: &RemoteNodesSamplerRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<RemoteNodesSamplerResponse> {
        let strategy = self
            .strategy(strategy_name)
            .ok_or_else(|| RuntimeError::UnknownSamplingStrategy(strategy_name.to_string()))?;
        let pipeline = self.pipelines.acquire_cancellable(cancel).await?;

        let ctx = SchedulingContext::new(cancel.child_token());
        let nodes = pipeline
            .sample_nodes(&ctx, strategy.as_ref(), &request.pod_info, request.nodes_to_sample_bp)
            .map_err(RuntimeError::Stage)?;
        Ok(RemoteNodesSamplerResponse { nodes })
    }

    pub fn close(&self) {
        self.pipelines.close();
    }
}
