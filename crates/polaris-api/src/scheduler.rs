//! Pod submission and status handlers of the scheduler.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use polaris_framework::Pod;
use polaris_runtime::SchedulerStats;
use serde::Serialize;
use tracing::debug;

use crate::{SchedulerApiState, error_response, runtime_error_status};

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub application: String,
    pub status: &'static str,
    pub stats: SchedulerStats,
}

/// POST /pods
pub async fn submit_pod(
    State(state): State<SchedulerApiState>,
    body: Result<Json<Pod>, JsonRejection>,
) -> Response {
    let Json(pod) = match body {
        Ok(body) => body,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST),
    };
    if pod.metadata.name.is_empty() {
        return error_response("pod name must not be empty", StatusCode::BAD_REQUEST);
    }

    match state.scheduler.submit_pod(pod.clone()).await {
        Ok(()) => {
            debug!(pod = %pod.key(), "pod submitted");
            (StatusCode::CREATED, Json(pod)).into_response()
        }
        Err(e) => error_response(&e.to_string(), runtime_error_status(&e)),
    }
}

/// GET /status
pub async fn status(State(state): State<SchedulerApiState>) -> Json<SchedulerStatus> {
    let scheduler = &state.scheduler;
    Json(SchedulerStatus {
        application: scheduler.services().config.scheduler_name.clone(),
        status: scheduler.state(),
        stats: scheduler.stats(),
    })
}
