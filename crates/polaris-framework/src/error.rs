//! Framework error types.

use thiserror::Error;

/// Errors raised outside of pipeline stages (configuration, model parsing,
/// client lookup). Stage outcomes use [`crate::Status`] instead.
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid resource quantity {quantity:?}: {reason}")]
    InvalidQuantity { quantity: String, reason: String },

    #[error("could not find a ClusterClient for cluster {0}")]
    ClusterNotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;
