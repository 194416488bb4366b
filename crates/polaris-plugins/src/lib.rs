//! polaris-plugins: the plugins that ship with Polaris.
//!
//! ```text
//! Scheduler                         Cluster agent
//!   Sort         PrioritySort         SamplingStrategy  RandomSamplingStrategy ("random")
//!   SampleNodes  RemoteNodesSampler                     RoundRobinSamplingStrategy ("round-robin")
//!   PreFilter ┐                       PreFilter ┐
//!   Filter    ├  ResourcesFit         Filter    ├  ResourcesFit
//!   Score     ┘                       Score     ┘
//!                                     CheckConflicts   ResourcesFit
//! ```

pub mod priority_sort;
pub mod random_sampling;
pub mod registry;
pub mod remote_nodes_sampler;
pub mod resources_fit;
pub mod round_robin_sampling;

pub use priority_sort::PrioritySort;
pub use random_sampling::RandomSamplingStrategy;
pub use registry::{default_cluster_agent_registry, default_scheduler_registry};
pub use remote_nodes_sampler::{RemoteNodesSampler, RemoteNodesSamplerConfig};
pub use resources_fit::{ResourcesFit, ScoringMode};
pub use round_robin_sampling::RoundRobinSamplingStrategy;
