//! SampleNodes plugin that asks the node samplers of all clusters for
//! candidates and merges their answers.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use polaris_cluster::remote_sampler::DEFAULT_MAX_CONCURRENT_REQUESTS;
use polaris_cluster::{
    HttpRemoteSamplerClient, RemoteNodesSamplerRequest, RemoteNodesSamplerResult,
    RemoteSamplerClient, RemoteSamplerClientsManager,
};
use polaris_framework::{
    ClusterClientsManager, NodeInfo, Plugin, PluginConfig, PluginConfigExt, PodInfo,
    SampleNodesPlugin, SchedulerServices, SchedulingContext, StageResult, Status,
};
use tracing::{debug, warn};

pub const REMOTE_NODES_SAMPLER: &str = "RemoteNodesSampler";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNodesSamplerConfig {
    /// Strategy requested from every cluster, e.g. `random`.
    pub sampling_strategy: String,
    /// Cluster name to node sampler base URI.
    pub remote_samplers: BTreeMap<String, String>,
    pub max_concurrent_requests_per_instance: usize,
    /// Share of the clusters asked per pod, in `(0, 1]`.
    pub percentage_of_clusters_to_sample: f64,
}

impl RemoteNodesSamplerConfig {
    /// Read the plugin config and check that every known cluster has a
    /// sampler URI.
    pub fn parse(
        config: Option<&PluginConfig>,
        clusters: &dyn ClusterClientsManager,
    ) -> anyhow::Result<Self> {
        let config = config.ok_or_else(|| anyhow!("{REMOTE_NODES_SAMPLER} requires a config"))?;

        let sampling_strategy = config
            .read_string("samplingStrategy")
            .filter(|s| !s.is_empty())
            .context("samplingStrategy must be set")?
            .to_string();
        let remote_samplers = config
            .read_string_map("remoteSamplers")
            .context("remoteSamplers must be a map of cluster names to URIs")?;

        clusters.for_each(&mut |cluster_name, _| {
            match remote_samplers.get(cluster_name) {
                Some(uri) if !uri.is_empty() => Ok(()),
                _ => bail!("no remote sampler URI found for cluster {cluster_name}"),
            }
        })?;

        let max_concurrent_requests_per_instance =
            match config.read_i64("maxConcurrentRequestsPerInstance") {
                Some(n) if n > 0 => n as usize,
                Some(n) => bail!("maxConcurrentRequestsPerInstance must be positive, got {n}"),
                None => DEFAULT_MAX_CONCURRENT_REQUESTS,
            };
        let percentage_of_clusters_to_sample =
            match config.read_f64("percentageOfClustersToSample") {
                Some(p) if p > 0.0 && p <= 1.0 => p,
                Some(p) => bail!("percentageOfClustersToSample must be in (0, 1], got {p}"),
                None => 1.0,
            };

        Ok(Self {
            sampling_strategy,
            remote_samplers,
            max_concurrent_requests_per_instance,
            percentage_of_clusters_to_sample,
        })
    }
}

pub struct RemoteNodesSampler {
    samplers: RemoteSamplerClientsManager,
    nodes_to_sample_bp: u32,
    percentage_of_clusters_to_sample: f64,
}

impl RemoteNodesSampler {
    pub fn new(config: Option<&PluginConfig>, services: &SchedulerServices) -> anyhow::Result<Self> {
        let parsed = RemoteNodesSamplerConfig::parse(config, services.cluster_clients.as_ref())?;
        let clients = services
            .cluster_clients
            .cluster_names()
            .into_iter()
            .filter_map(|cluster| {
                let uri = parsed.remote_samplers.get(&cluster)?;
                let client =
                    HttpRemoteSamplerClient::new(cluster.as_str(), uri, &parsed.sampling_strategy);
                Some(Arc::new(client) as Arc<dyn RemoteSamplerClient>)
            })
            .collect();
        let samplers =
            RemoteSamplerClientsManager::new(clients, parsed.max_concurrent_requests_per_instance);
        Ok(Self::with_samplers(
            samplers,
            services.config.nodes_to_sample_bp,
            parsed.percentage_of_clusters_to_sample,
        ))
    }

    pub fn with_samplers(
        samplers: RemoteSamplerClientsManager,
        nodes_to_sample_bp: u32,
        percentage_of_clusters_to_sample: f64,
    ) -> Self {
        Self {
            samplers,
            nodes_to_sample_bp,
            percentage_of_clusters_to_sample,
        }
    }
}

impl Plugin for RemoteNodesSampler {
    fn name(&self) -> &str {
        REMOTE_NODES_SAMPLER
    }

    fn as_sample_nodes(self: Arc<Self>) -> Option<Arc<dyn SampleNodesPlugin>> {
        Some(self)
    }
}

#[async_trait]
impl SampleNodesPlugin for RemoteNodesSampler {
    async fn sample_nodes(
        &self,
        ctx: &SchedulingContext,
        pod: &PodInfo,
    ) -> StageResult<Vec<NodeInfo>> {
        let request = RemoteNodesSamplerRequest {
            pod_info: pod.clone(),
            nodes_to_sample_bp: self.nodes_to_sample_bp,
        };
        let cancel = ctx.cancellation_token();
        let results = if self.percentage_of_clusters_to_sample >= 1.0 {
            self.samplers
                .sample_nodes_from_all_clusters(request, cancel)
                .await
        } else {
            self.samplers
                .sample_nodes_from_clusters(request, self.percentage_of_clusters_to_sample, cancel)
                .await
        }
        .map_err(Status::internal_error)?;

        let mut nodes = Vec::new();
        for (cluster, result) in results {
            match result {
                RemoteNodesSamplerResult::Response(resp) => nodes.extend(resp.nodes),
                RemoteNodesSamplerResult::Error(err) => {
                    warn!(cluster = %cluster, error = %err.message(), "remote sampling failed");
                }
            }
        }
        debug!(pod = %pod.pod.key(), nodes = nodes.len(), "remote sampling finished");
        Ok(nodes)
    }
}
