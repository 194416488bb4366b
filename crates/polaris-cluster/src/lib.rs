//! polaris-cluster: how Polaris components reach clusters.
//!
//! ```text
//! Scheduler                                Cluster agent
//!   RemoteSamplerClientsManager ── HTTP ──▶  POST /samples/<strategy>
//!   RemoteClusterAgentClient    ── HTTP ──▶  POST /agent/scheduling-decision
//!   RemoteClusterBrokerClient   ── HTTP ──▶  POST /broker/scheduling-decision
//!                                            │
//!                                            ▼
//!                                          InMemoryClusterClient
//!                                            │ node/pod events
//!                                            ▼
//!                                          ClusterNodesCache
//! ```

pub mod error;
pub mod http;
pub mod in_memory_cluster;
pub mod nodes_cache;
pub mod remote_cluster;
pub mod remote_sampler;

pub use error::{ClusterError, ClusterResult};
pub use in_memory_cluster::{InMemoryClusterClient, load_nodes_file};
pub use nodes_cache::{ClusterNodesCache, NodesCacheUpdate};
pub use remote_cluster::{RemoteClusterAgentClient, RemoteClusterBrokerClient};
pub use remote_sampler::{
    HttpRemoteSamplerClient, RemoteNodesSamplerError, RemoteNodesSamplerRequest,
    RemoteNodesSamplerResponse, RemoteNodesSamplerResult, RemoteSamplerClient,
    RemoteSamplerClientsManager,
};
