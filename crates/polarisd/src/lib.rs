//! Assembly of the Polaris components run by `polarisd`.
//!
//! ```text
//! scheduler      SchedulerConfig ──▶ PolarisScheduler ──▶ scheduler_router
//!                                    └─ RemoteClusterAgentClient per remote cluster
//!
//! cluster-agent  ClusterAgentConfig ──▶ InMemoryClusterClient ◀─▶ ClusterNodesCache
//!                                       NodeSamplerService + BindingService
//!                                       └─▶ cluster_agent_router
//! ```

pub mod cluster_agent;
pub mod scheduler;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bind every address in `listen_on`.
pub async fn bind_all(listen_on: &[String]) -> anyhow::Result<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(listen_on.len());
    for addr in listen_on {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {addr}: {e}"))?;
        listeners.push(TcpListener::bind(addr).await?);
    }
    Ok(listeners)
}

/// Serve `router` on all `listeners` until `cancel` fires.
pub async fn serve(
    listeners: Vec<TcpListener>,
    router: Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut servers = JoinSet::new();
    for listener in listeners {
        info!(addr = %listener.local_addr()?, "API server starting");
        let server = axum::serve(listener, router.clone())
            .with_graceful_shutdown(cancel.clone().cancelled_owned());
        servers.spawn(async move { server.await });
    }
    while let Some(result) = servers.join_next().await {
        result??;
    }
    Ok(())
}
