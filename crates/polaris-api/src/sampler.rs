//! Node sampler handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use polaris_cluster::RemoteNodesSamplerRequest;
use serde::Serialize;

use crate::{ClusterAgentApiState, error_response, runtime_error_status};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerStatus {
    pub status: &'static str,
    /// One `/samples/<strategy>` route per sampling strategy.
    pub routes: Vec<String>,
    pub nodes_count: usize,
}

/// POST /samples/{strategy}
pub async fn sample_nodes(
    State(state): State<ClusterAgentApiState>,
    Path(strategy): Path<String>,
    body: Result<Json<RemoteNodesSamplerRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST),
    };

    match state
        .sampler
        .sample_nodes(&strategy, &request, &state.cancel)
        .await
    {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e.to_string(), runtime_error_status(&e)),
    }
}

/// GET /samples/status
pub async fn status(State(state): State<ClusterAgentApiState>) -> Json<SamplerStatus> {
    let routes = state
        .sampler
        .strategies()
        .iter()
        .map(|s| format!("/samples/{}", s.strategy_name()))
        .collect();
    Json(SamplerStatus {
        status: "ok",
        routes,
        nodes_count: state.sampler.nodes_count(),
    })
}
