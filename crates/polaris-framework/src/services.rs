//! Services handed to plugin factories.
//!
//! Both structs are built once at startup by the component that owns the
//! pipelines and passed by reference to every factory.

use std::sync::Arc;

use crate::client::{ClusterClientsManager, LocalClusterClient, NodesCache};
use crate::config::{ClusterAgentConfig, SchedulerConfig};

/// What scheduler plugins may use.
#[derive(Clone)]
pub struct SchedulerServices {
    pub config: Arc<SchedulerConfig>,
    pub cluster_clients: Arc<dyn ClusterClientsManager>,
}

/// What cluster agent plugins may use.
#[derive(Clone)]
pub struct ClusterAgentServices {
    pub config: Arc<ClusterAgentConfig>,
    pub cluster_client: Arc<dyn LocalClusterClient>,
    pub nodes_cache: Arc<dyn NodesCache>,
}

impl ClusterAgentServices {
    pub fn cluster_name(&self) -> &str {
        self.cluster_client.cluster_name()
    }
}
