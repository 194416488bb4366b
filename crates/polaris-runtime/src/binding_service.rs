//! Runs scheduling decisions received by a cluster agent through a pool of
//! binding pipelines.

use polaris_collections::EntityLocker;
use polaris_framework::{
    BindingPipelineStopwatches, ClusterAgentServices, ClusterSchedulingDecision,
    CommitSchedulingDecisionSuccess, PluginsRegistry, SchedulingContext,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::binding_pipeline::BindingPipeline;
use crate::error::{RuntimeError, RuntimeResult};
use crate::pipeline_pool::PipelinePool;
use crate::plugin_factories::new_binding_pipeline_plugins;

pub struct BindingService {
    pipelines: PipelinePool<BindingPipeline>,
    services: ClusterAgentServices,
}

impl BindingService {
    /// Build `parallelBindingPipelines` binding pipelines. All of them share
    /// one node locker.
    pub fn new(
        registry: &PluginsRegistry<ClusterAgentServices>,
        services: ClusterAgentServices,
    ) -> RuntimeResult<Self> {
        let nodes_locker = EntityLocker::new();
        let count = services.config.parallel_binding_pipelines;
        let pipelines = (0..count)
            .map(|id| {
                let plugins = new_binding_pipeline_plugins(registry, &services)?;
                Ok(BindingPipeline::new(id, plugins, services.clone(), nodes_locker.clone()))
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        info!(cluster = %services.cluster_name(), pipelines = count, "binding pipelines created");
        Ok(Self {
            pipelines: PipelinePool::new(pipelines),
            services,
        })
    }

    pub fn services(&self) -> &ClusterAgentServices {
        &self.services
    }

    /// Wait for a free binding pipeline and commit `decision` with it.
    pub async fn commit_scheduling_decision(
        &self,
        decision: &ClusterSchedulingDecision,
        cancel: &CancellationToken,
    ) -> RuntimeResult<CommitSchedulingDecisionSuccess> {
        let ctx = SchedulingContext::new(cancel.child_token());
        let stopwatches = BindingPipelineStopwatches::of(&ctx);

        stopwatches.queue_time.start();
        let pipeline = self.pipelines.acquire_cancellable(cancel).await?;
        stopwatches.queue_time.stop();

        let result = pipeline.commit_scheduling_decision(&ctx, decision).await;
        drop(pipeline);

        let success = result.map_err(RuntimeError::Stage)?;
        debug!(
            pod = %decision.pod.key(),
            node = %success.node_name,
            queue_time_ms = success.timings.queue_time,
            node_lock_time_ms = success.timings.node_lock_time,
            commit_ms = success.timings.commit_decision,
            "scheduling decision committed"
        );
        Ok(success)
    }

    /// Stop handing out pipelines.
    pub fn close(&self) {
        self.pipelines.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_cluster::{ClusterNodesCache, InMemoryClusterClient};
    use polaris_framework::{ClusterAgentConfig, Node, Pod, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    fn service(parallel_binding_pipelines: usize) -> BindingService {
        let nodes = vec![Node::new("n1")];
        let cache = Arc::new(ClusterNodesCache::new(Duration::from_millis(5), 16));
        cache.load_nodes(nodes.clone());
        let config = ClusterAgentConfig {
            cluster_name: "c1".into(),
            parallel_binding_pipelines,
            ..Default::default()
        };
        let services = ClusterAgentServices {
            config: Arc::new(config),
            cluster_client: Arc::new(InMemoryClusterClient::new("c1", nodes)),
            nodes_cache: cache,
        };
        BindingService::new(&PluginsRegistry::new(), services).unwrap()
    }

    fn decision(name: &str, node: &str) -> ClusterSchedulingDecision {
        ClusterSchedulingDecision {
            pod: Pod::new("default", name),
            node_name: node.into(),
        }
    }

    #[tokio::test]
    async fn commits_through_a_pooled_pipeline() {
        let service = service(2);
        let cancel = CancellationToken::new();

        let success = service
            .commit_scheduling_decision(&decision("p1", "n1"), &cancel)
            .await
            .unwrap();
        assert_eq!(success.namespace, "default");
        assert_eq!(success.node_name, "n1");
    }

    #[tokio::test]
    async fn pipeline_failures_are_stage_errors() {
        let service = service(1);
        let err = service
            .commit_scheduling_decision(&decision("p1", "missing"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Stage(ref s) if s.code() == StatusCode::Unschedulable));
    }

    #[tokio::test]
    async fn closed_service_rejects_decisions() {
        let service = service(1);
        service.close();
        let err = service
            .commit_scheduling_decision(&decision("p1", "n1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::PoolClosed));
    }

    #[test]
    fn unknown_check_conflicts_plugin_fails_setup() {
        let config = ClusterAgentConfig {
            cluster_name: "c1".into(),
            binding_plugins: polaris_framework::config::BindingPluginsList {
                check_conflicts: vec![polaris_framework::config::PluginListEntry::new("Nope")],
            },
            ..Default::default()
        };
        let services = ClusterAgentServices {
            config: Arc::new(config),
            cluster_client: Arc::new(InMemoryClusterClient::new("c1", Vec::new())),
            nodes_cache: Arc::new(ClusterNodesCache::new(Duration::from_millis(5), 16)),
        };
        let err = BindingService::new(&PluginsRegistry::new(), services).err().unwrap();
        assert!(matches!(err, RuntimeError::PluginSetup(_)));
    }
}
