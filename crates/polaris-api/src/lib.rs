//! polaris-api: REST API of the Polaris components.
//!
//! # Cluster agent routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/agent/scheduling-decision` | Commit a decision through a binding pipeline |
//! | POST | `/broker/scheduling-decision` | Relay a decision straight to the cluster |
//! | POST | `/samples/{strategy}` | Sample nodes with a sampling strategy |
//! | GET | `/samples/status` | Sampler status and routes |
//!
//! # Scheduler routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/pods` | Submit a pod for scheduling |
//! | GET | `/status` | Scheduler status |
//!
//! Errors use the body `{"error": {"message": ...}}`.

pub mod agent;
pub mod sampler;
pub mod scheduler;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use polaris_framework::ErrorResponse;
use polaris_runtime::{BindingService, NodeSamplerService, PolarisScheduler, RuntimeError};
use tokio_util::sync::CancellationToken;

/// Shared state of the cluster agent routes.
#[derive(Clone)]
pub struct ClusterAgentApiState {
    pub binding: Arc<BindingService>,
    pub sampler: Arc<NodeSamplerService>,
    /// Cancels waits of in-flight requests on shutdown.
    pub cancel: CancellationToken,
}

/// Shared state of the scheduler routes.
#[derive(Clone)]
pub struct SchedulerApiState {
    pub scheduler: Arc<PolarisScheduler>,
}

/// Build the cluster agent router (binding, broker and sampler routes).
pub fn cluster_agent_router(state: ClusterAgentApiState) -> Router {
    Router::new()
        .route("/agent/scheduling-decision", post(agent::commit_decision))
        .route("/broker/scheduling-decision", post(agent::relay_decision))
        .route("/samples/status", get(sampler::status))
        .route("/samples/{strategy}", post(sampler::sample_nodes))
        .with_state(state)
}

/// Build the scheduler router (pod submission and status).
pub fn scheduler_router(state: SchedulerApiState) -> Router {
    Router::new()
        .route("/pods", post(scheduler::submit_pod))
        .route("/status", get(scheduler::status))
        .with_state(state)
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, Json(ErrorResponse::new(msg))).into_response()
}

/// HTTP status for a runtime failure.
pub(crate) fn runtime_error_status(err: &RuntimeError) -> StatusCode {
    match err {
        RuntimeError::UnknownSamplingStrategy(_) => StatusCode::NOT_FOUND,
        RuntimeError::NotAccepting | RuntimeError::PoolClosed | RuntimeError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
