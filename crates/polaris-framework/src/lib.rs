//! polaris-framework: the contracts every Polaris component is built on.
//!
//! - [`model`]: pods, nodes, and the items that flow through the pipelines
//! - [`resources`]: resource quantities and aggregated resource vectors
//! - [`status`]: the tri-state result of every stage call
//! - [`plugin`]: stage plugin traits and per-pipeline plugin sets
//! - [`queue`]: the priority scheduling queue
//! - [`plugin_registry`]: plugin factories and instantiation
//! - [`client`]: cluster client and nodes cache contracts
//! - [`config`]: scheduler and cluster agent configuration
//!
//! # Pipelines
//!
//! ```text
//! Scheduler
//!   PrioritySchedulingQueue ──▶ SampleNodes ──▶ Decision pipeline
//!                                  │             PreFilter → Filter → PreScore
//!                                  │             → Score → Reserve
//!                                  ▼
//! Cluster agent               Sampling pipeline
//!                               SamplingStrategy → PreFilter → Filter
//!                               → PreScore → Score
//!                             Binding pipeline
//!                               lock node → fetch → CheckConflicts → commit
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod plugin;
pub mod plugin_registry;
pub mod queue;
pub mod resources;
pub mod scoring;
pub mod services;
pub mod status;
pub mod stopwatch;

pub use client::{
    ClusterClient, ClusterClientsManager, LocalClusterClient, NodesCache, PodQueuedOnNode,
    StaticClusterClientsManager,
};
pub use config::{ClusterAgentConfig, PluginConfig, PluginConfigExt, SchedulerConfig};
pub use context::SchedulingContext;
pub use error::{FrameworkError, FrameworkResult};
pub use model::*;
pub use plugin::*;
pub use plugin_registry::{PluginFactoryFn, PluginSetup, PluginsRegistry};
pub use queue::PrioritySchedulingQueue;
pub use resources::{Quantity, ResourceList, Resources};
pub use services::{ClusterAgentServices, SchedulerServices};
pub use status::{Status, StatusCode};
pub use stopwatch::{BindingPipelineStopwatches, SchedulingStopwatches, Stopwatch};
