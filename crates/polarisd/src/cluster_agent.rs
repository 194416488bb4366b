//! Cluster agent assembly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use polaris_api::{ClusterAgentApiState, cluster_agent_router};
use polaris_cluster::{ClusterNodesCache, InMemoryClusterClient, load_nodes_file};
use polaris_framework::{ClusterAgentConfig, ClusterAgentServices, Node};
use polaris_plugins::default_cluster_agent_registry;
use polaris_runtime::{BindingService, NodeSamplerService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running cluster agent, minus its HTTP listeners.
pub struct ClusterAgent {
    pub router: Router,
    pub cluster: Arc<InMemoryClusterClient>,
    pub nodes_cache: Arc<ClusterNodesCache>,
    pub binding: Arc<BindingService>,
    pub sampler: Arc<NodeSamplerService>,
    pub cache_watch: JoinHandle<()>,
}

/// Resolve `nodesFile` relative to the directory of the config file.
pub fn nodes_file_path(config: &ClusterAgentConfig, config_path: &Path) -> Option<PathBuf> {
    let nodes_file = Path::new(config.nodes_file.as_deref()?);
    if nodes_file.is_absolute() {
        return Some(nodes_file.to_path_buf());
    }
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    Some(base.join(nodes_file))
}

pub fn load_nodes(config: &ClusterAgentConfig, config_path: &Path) -> anyhow::Result<Vec<Node>> {
    match nodes_file_path(config, config_path) {
        Some(path) => {
            let nodes = load_nodes_file(&path)?;
            info!(path = %path.display(), nodes = nodes.len(), "nodes file loaded");
            Ok(nodes)
        }
        None => Ok(Vec::new()),
    }
}

/// Build the cluster agent around an in-memory cluster holding `nodes`.
/// The nodes cache updater runs until `cancel` fires.
pub fn build_cluster_agent(
    config: ClusterAgentConfig,
    nodes: Vec<Node>,
    cancel: &CancellationToken,
) -> anyhow::Result<ClusterAgent> {
    config.validate()?;

    let nodes_cache = Arc::new(ClusterNodesCache::new(
        Duration::from_millis(config.nodes_cache_update_interval_ms),
        config.nodes_cache_update_queue_size,
    ));
    nodes_cache.load_nodes(nodes.clone());
    let cache_watch = nodes_cache.start_watch(cancel.child_token())?;

    let cluster = Arc::new(
        InMemoryClusterClient::new(config.cluster_name.as_str(), nodes)
            .with_cache_updates(nodes_cache.updates()),
    );
    let services = ClusterAgentServices {
        config: Arc::new(config),
        cluster_client: cluster.clone(),
        nodes_cache: nodes_cache.clone(),
    };

    let registry = default_cluster_agent_registry();
    let sampler = Arc::new(NodeSamplerService::new(&registry, &services)?);
    let binding = Arc::new(BindingService::new(&registry, services.clone())?);

    let router = cluster_agent_router(ClusterAgentApiState {
        binding: binding.clone(),
        sampler: sampler.clone(),
        cancel: cancel.clone(),
    });
    info!(
        cluster = %services.cluster_name(),
        nodes = sampler.nodes_count(),
        "cluster agent ready"
    );

    Ok(ClusterAgent {
        router,
        cluster,
        nodes_cache,
        binding,
        sampler,
        cache_watch,
    })
}

/// Run a cluster agent from its config file until `cancel` fires.
pub async fn run(config_path: &Path, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = ClusterAgentConfig::from_file(config_path)?;
    let nodes = load_nodes(&config, config_path)?;
    let listeners = crate::bind_all(&config.listen_on).await?;

    let agent = build_cluster_agent(config, nodes, &cancel)?;
    crate::serve(listeners, agent.router, cancel.clone()).await?;

    agent.binding.close();
    agent.sampler.close();
    cancel.cancel();
    agent.cache_watch.await?;
    info!("cluster agent stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_file_is_relative_to_the_config() {
        let config = ClusterAgentConfig {
            nodes_file: Some("nodes.toml".into()),
            ..Default::default()
        };
        let path = nodes_file_path(&config, Path::new("/etc/polaris/agent.toml")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/polaris/nodes.toml"));

        let config = ClusterAgentConfig {
            nodes_file: Some("/srv/nodes.toml".into()),
            ..Default::default()
        };
        let path = nodes_file_path(&config, Path::new("agent.toml")).unwrap();
        assert_eq!(path, PathBuf::from("/srv/nodes.toml"));

        assert!(nodes_file_path(&ClusterAgentConfig::default(), Path::new("a.toml")).is_none());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let err = build_cluster_agent(
            ClusterAgentConfig::default(),
            Vec::new(),
            &CancellationToken::new(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("clusterName"));
    }
}
