//! polaris-runtime: the engines that run plugins.
//!
//! ```text
//! Scheduler (PolarisScheduler)
//!   queue ──▶ sampling loops ──▶ decision pumps ──▶ ClusterClient commit
//!                                 DecisionPipeline
//!
//! Cluster agent
//!   NodeSamplerService ──▶ PipelinePool<SamplingPipeline>
//!   BindingService     ──▶ PipelinePool<BindingPipeline> ──▶ EntityLocker
//! ```

pub mod binding_pipeline;
pub mod binding_service;
pub mod decision_pipeline;
pub mod error;
pub mod node_sampler;
pub mod pipeline_pool;
pub mod plugin_factories;
pub mod sampling_pipeline;
pub mod scheduler;
pub mod stages;

pub use binding_pipeline::BindingPipeline;
pub use binding_service::BindingService;
pub use decision_pipeline::DecisionPipeline;
pub use error::{RuntimeError, RuntimeResult};
pub use node_sampler::NodeSamplerService;
pub use pipeline_pool::{PipelinePool, PooledPipeline};
pub use sampling_pipeline::SamplingPipeline;
pub use scheduler::{PolarisScheduler, SchedulerStats};
