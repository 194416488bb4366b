//! Runtime error types.

use polaris_cluster::ClusterError;
use polaris_framework::{FrameworkError, Status};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot {action}, because the current state is {state}")]
    InvalidState { action: &'static str, state: &'static str },

    #[error("no {0} plugin is configured")]
    MissingPlugin(&'static str),

    #[error("plugin setup failed: {0:#}")]
    PluginSetup(#[from] anyhow::Error),

    #[error("the scheduler is not accepting pods")]
    NotAccepting,

    #[error("pipeline pool is closed")]
    PoolClosed,

    #[error("operation was cancelled")]
    Cancelled,

    /// A pipeline ended with a non-success status.
    #[error("{0}")]
    Stage(Status),

    #[error("unknown sampling strategy {0}")]
    UnknownSamplingStrategy(String),

    #[error(transparent)]
    Framework(#[from] FrameworkError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
