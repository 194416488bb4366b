//! Scheduling decision handlers of the cluster agent and the broker.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use polaris_framework::ClusterSchedulingDecision;
use tracing::{debug, warn};

use crate::{ClusterAgentApiState, error_response, runtime_error_status};

/// POST /agent/scheduling-decision
pub async fn commit_decision(
    State(state): State<ClusterAgentApiState>,
    body: Result<Json<ClusterSchedulingDecision>, JsonRejection>,
) -> Response {
    let Json(decision) = match body {
        Ok(body) => body,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST),
    };

    match state
        .binding
        .commit_scheduling_decision(&decision, &state.cancel)
        .await
    {
        Ok(success) => (StatusCode::CREATED, Json(success)).into_response(),
        Err(e) => {
            warn!(pod = %decision.pod.key(), node = %decision.node_name, error = %e, "binding failed");
            error_response(&e.to_string(), runtime_error_status(&e))
        }
    }
}

/// POST /broker/scheduling-decision
///
/// Commits without a binding pipeline, i.e. without locking or conflict
/// checks.
pub async fn relay_decision(
    State(state): State<ClusterAgentApiState>,
    body: Result<Json<ClusterSchedulingDecision>, JsonRejection>,
) -> Response {
    let Json(decision) = match body {
        Ok(body) => body,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST),
    };

    let client = &state.binding.services().cluster_client;
    match client.commit_scheduling_decision(&decision).await {
        Ok(success) => {
            debug!(pod = %decision.pod.key(), node = %decision.node_name, "decision relayed");
            (StatusCode::CREATED, Json(success)).into_response()
        }
        Err(e) => error_response(&format!("{e:#}"), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
