//! Cluster clients that forward scheduling decisions over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use polaris_framework::{
    ClusterClient, ClusterSchedulingDecision, CommitSchedulingDecisionSuccess, ErrorResponse,
};
use tracing::debug;

use crate::error::ClusterError;
use crate::http::{DEFAULT_REQUEST_TIMEOUT, HttpResponse, join_uri, post_json};

pub const AGENT_SCHEDULING_DECISION_PATH: &str = "agent/scheduling-decision";
pub const BROKER_SCHEDULING_DECISION_PATH: &str = "broker/scheduling-decision";

/// Commits decisions to the cluster agent of a remote cluster.
pub struct RemoteClusterAgentClient {
    cluster_name: String,
    decision_uri: String,
    timeout: Duration,
}

impl RemoteClusterAgentClient {
    pub fn new(cluster_name: impl Into<String>, base_uri: &str) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            decision_uri: join_uri(base_uri, &[AGENT_SCHEDULING_DECISION_PATH]),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ClusterClient for RemoteClusterAgentClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn commit_scheduling_decision(
        &self,
        decision: &ClusterSchedulingDecision,
    ) -> anyhow::Result<CommitSchedulingDecisionSuccess> {
        commit_over_http(&self.decision_uri, decision, self.timeout).await
    }
}

/// Commits decisions through a broker that relays them to the cluster.
pub struct RemoteClusterBrokerClient {
    cluster_name: String,
    decision_uri: String,
    timeout: Duration,
}

impl RemoteClusterBrokerClient {
    pub fn new(cluster_name: impl Into<String>, base_uri: &str) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            decision_uri: join_uri(base_uri, &[BROKER_SCHEDULING_DECISION_PATH]),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ClusterClient for RemoteClusterBrokerClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn commit_scheduling_decision(
        &self,
        decision: &ClusterSchedulingDecision,
    ) -> anyhow::Result<CommitSchedulingDecisionSuccess> {
        commit_over_http(&self.decision_uri, decision, self.timeout).await
    }
}

/// POST the decision and interpret the reply: `201 Created` carries the
/// success body, anything else an `{"error": {"message": ...}}` body.
async fn commit_over_http(
    uri: &str,
    decision: &ClusterSchedulingDecision,
    timeout: Duration,
) -> anyhow::Result<CommitSchedulingDecisionSuccess> {
    let resp = post_json(uri, decision, timeout).await?;
    if resp.status == StatusCode::CREATED {
        return Ok(resp.json()?);
    }
    Err(remote_error(&resp).into())
}

pub(crate) fn remote_error(resp: &HttpResponse) -> ClusterError {
    let message = match resp.json::<ErrorResponse>() {
        Ok(body) => body.error.message,
        Err(e) => {
            debug!(status = %resp.status, error = %e, "unparseable error body");
            String::from_utf8_lossy(&resp.body).into_owned()
        }
    };
    ClusterError::Remote {
        status: resp.status.as_u16(),
        message,
    }
}
