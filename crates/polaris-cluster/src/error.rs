//! Cluster access error types.

use polaris_framework::FrameworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid URI {0}")]
    InvalidUri(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("remote endpoint returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("nodes cache watch has already been started")]
    WatchAlreadyStarted,

    #[error("sampling request queue is closed")]
    QueueClosed,

    #[error("sampling was cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(#[from] http::Error),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("nodes file parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Framework(#[from] FrameworkError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
