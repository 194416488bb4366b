//! Scheduler assembly.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use polaris_api::{SchedulerApiState, scheduler_router};
use polaris_cluster::RemoteClusterAgentClient;
use polaris_framework::{
    ClusterClient, SchedulerConfig, SchedulerServices, StaticClusterClientsManager,
};
use polaris_plugins::default_scheduler_registry;
use polaris_runtime::PolarisScheduler;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A started scheduler, minus its HTTP listeners.
pub struct Scheduler {
    pub router: Router,
    pub scheduler: Arc<PolarisScheduler>,
}

/// One cluster agent client per entry of `remoteClusters`.
pub fn cluster_clients(config: &SchedulerConfig) -> BTreeMap<String, Arc<dyn ClusterClient>> {
    config
        .remote_clusters
        .iter()
        .map(|(name, remote)| {
            let client = RemoteClusterAgentClient::new(name.as_str(), &remote.base_uri);
            (name.clone(), Arc::new(client) as Arc<dyn ClusterClient>)
        })
        .collect()
}

/// Create and start the scheduler. It stops when `cancel` fires.
pub fn start_scheduler(
    config: SchedulerConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<Scheduler> {
    config.validate()?;

    let clients = cluster_clients(&config);
    info!(clusters = ?clients.keys().collect::<Vec<_>>(), "remote clusters configured");
    let services = SchedulerServices {
        config: Arc::new(config),
        cluster_clients: Arc::new(StaticClusterClientsManager::new(clients)),
    };

    let scheduler = Arc::new(PolarisScheduler::new(services, default_scheduler_registry()));
    scheduler.start(cancel)?;

    let router = scheduler_router(SchedulerApiState {
        scheduler: scheduler.clone(),
    });
    Ok(Scheduler { router, scheduler })
}

/// Run the scheduler from its config file until `cancel` fires.
pub async fn run(config_path: &Path, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_file(config_path)?;
    let listeners = crate::bind_all(&config.listen_on).await?;

    let started = start_scheduler(config, &cancel)?;
    crate::serve(listeners, started.router, cancel.clone()).await?;

    started.scheduler.stop();
    info!("scheduler stopped");
    Ok(())
}
