//! Remote node sampling: the wire contract of a cluster's node sampler, an
//! HTTP client for it, and the manager that fans one request out to many
//! clusters with bounded concurrency.
//!
//! ```text
//! sample_nodes_from_clusters(req)
//!   │  one job per cluster
//!   ▼
//! bounded job queue ──▶ worker 1 ─┐
//!                   ──▶ worker 2 ─┼──▶ per-call results channel ──▶ join
//!                   ──▶ worker N ─┘      (one result per cluster)
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use polaris_framework::{NodeInfo, PodInfo, PolarisErrorDto};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClusterError, ClusterResult};
use crate::http::{DEFAULT_REQUEST_TIMEOUT, join_uri, post_json};
use crate::remote_cluster::remote_error;

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 50;

// ── Wire contract ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNodesSamplerRequest {
    pub pod_info: PodInfo,
    /// Share of the cluster's nodes to sample, in basis points.
    pub nodes_to_sample_bp: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNodesSamplerResponse {
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// Error body returned by a node sampler: `{"error": {"message": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNodesSamplerError {
    pub error: PolarisErrorDto,
}

impl RemoteNodesSamplerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: PolarisErrorDto::new(message),
        }
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }
}

impl From<ClusterError> for RemoteNodesSamplerError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Remote { message, .. } => Self::new(message),
            other => Self::new(other.to_string()),
        }
    }
}

/// Outcome of sampling a single cluster.
#[derive(Debug, Clone)]
pub enum RemoteNodesSamplerResult {
    Response(RemoteNodesSamplerResponse),
    Error(RemoteNodesSamplerError),
}

impl RemoteNodesSamplerResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

// ── Single-cluster client ──────────────────────────────────────

/// Samples nodes from one cluster using one sampling strategy.
#[async_trait]
pub trait RemoteSamplerClient: Send + Sync {
    fn cluster_name(&self) -> &str;

    fn sampling_strategy(&self) -> &str;

    async fn sample_nodes(
        &self,
        request: &RemoteNodesSamplerRequest,
    ) -> Result<RemoteNodesSamplerResponse, RemoteNodesSamplerError>;
}

/// Calls `POST <baseUri>/<strategy>` on a cluster's node sampler.
pub struct HttpRemoteSamplerClient {
    cluster_name: String,
    sampling_strategy: String,
    uri: String,
    timeout: Duration,
}

impl HttpRemoteSamplerClient {
    pub fn new(
        cluster_name: impl Into<String>,
        base_uri: &str,
        sampling_strategy: impl Into<String>,
    ) -> Self {
        let sampling_strategy = sampling_strategy.into();
        Self {
            cluster_name: cluster_name.into(),
            uri: join_uri(base_uri, &[sampling_strategy.as_str()]),
            sampling_strategy,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl RemoteSamplerClient for HttpRemoteSamplerClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn sampling_strategy(&self) -> &str {
        &self.sampling_strategy
    }

    async fn sample_nodes(
        &self,
        request: &RemoteNodesSamplerRequest,
    ) -> Result<RemoteNodesSamplerResponse, RemoteNodesSamplerError> {
        let resp = post_json(&self.uri, request, self.timeout).await?;
        if resp.status == StatusCode::OK {
            return resp.json().map_err(RemoteNodesSamplerError::from);
        }
        Err(remote_error(&resp).into())
    }
}

// ── Fan-out manager ────────────────────────────────────────────

struct SamplingJob {
    client: Arc<dyn RemoteSamplerClient>,
    request: Arc<RemoteNodesSamplerRequest>,
    cancel: CancellationToken,
    results: mpsc::Sender<(String, RemoteNodesSamplerResult)>,
}

type SharedJobReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<SamplingJob>>>;

/// Fans sampling requests out to the node samplers of many clusters.
///
/// Requests are executed by a fixed set of workers that share one bounded
/// job queue; the workers start with the first request. Per-cluster
/// failures are reported in the result map. Only a closed job queue or a
/// cancelled caller fail the whole call.
pub struct RemoteSamplerClientsManager {
    clients: Vec<Arc<dyn RemoteSamplerClient>>,
    max_concurrent_requests: usize,
    jobs_tx: mpsc::Sender<SamplingJob>,
    jobs_rx: Mutex<Option<mpsc::Receiver<SamplingJob>>>,
}

impl RemoteSamplerClientsManager {
    pub fn new(clients: Vec<Arc<dyn RemoteSamplerClient>>, max_concurrent_requests: usize) -> Self {
        let max_concurrent_requests = max_concurrent_requests.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel(max_concurrent_requests.max(clients.len()).max(1));
        Self {
            clients,
            max_concurrent_requests,
            jobs_tx,
            jobs_rx: Mutex::new(Some(jobs_rx)),
        }
    }

    pub fn clusters_count(&self) -> usize {
        self.clients.len()
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    /// Sample nodes from every cluster.
    pub async fn sample_nodes_from_all_clusters(
        &self,
        request: RemoteNodesSamplerRequest,
        cancel: &CancellationToken,
    ) -> ClusterResult<BTreeMap<String, RemoteNodesSamplerResult>> {
        self.fan_out(self.clients.clone(), request, cancel).await
    }

    /// Sample nodes from `ceil(percentage × clusters)` distinct, randomly
    /// chosen clusters (at least one).
    pub async fn sample_nodes_from_clusters(
        &self,
        request: RemoteNodesSamplerRequest,
        percentage: f64,
        cancel: &CancellationToken,
    ) -> ClusterResult<BTreeMap<String, RemoteNodesSamplerResult>> {
        let total = self.clients.len();
        let count = clusters_to_sample(total, percentage);
        if count >= total {
            return self.sample_nodes_from_all_clusters(request, cancel).await;
        }
        let targets: Vec<_> = {
            let mut rng = rand::thread_rng();
            rand::seq::index::sample(&mut rng, total, count)
                .into_iter()
                .map(|i| self.clients[i].clone())
                .collect()
        };
        self.fan_out(targets, request, cancel).await
    }

    async fn fan_out(
        &self,
        targets: Vec<Arc<dyn RemoteSamplerClient>>,
        request: RemoteNodesSamplerRequest,
        cancel: &CancellationToken,
    ) -> ClusterResult<BTreeMap<String, RemoteNodesSamplerResult>> {
        if cancel.is_cancelled() {
            return Err(ClusterError::Cancelled);
        }
        let mut results = BTreeMap::new();
        if targets.is_empty() {
            return Ok(results);
        }
        self.ensure_workers_started();

        // Jobs still queued or running when this call returns are dropped.
        let call_cancel = cancel.child_token();
        let _call_guard = call_cancel.clone().drop_guard();

        let expected = targets.len();
        let request = Arc::new(request);
        let (results_tx, mut results_rx) = mpsc::channel(expected);
        for client in targets {
            let job = SamplingJob {
                client,
                request: request.clone(),
                cancel: call_cancel.clone(),
                results: results_tx.clone(),
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClusterError::Cancelled),
                sent = self.jobs_tx.send(job) => {
                    sent.map_err(|_| ClusterError::QueueClosed)?;
                }
            }
        }
        drop(results_tx);

        while results.len() < expected {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClusterError::Cancelled),
                received = results_rx.recv() => match received {
                    Some((cluster, result)) => {
                        results.insert(cluster, result);
                    }
                    None => return Err(ClusterError::QueueClosed),
                }
            }
        }
        Ok(results)
    }

    fn ensure_workers_started(&self) {
        let mut jobs_rx = self.jobs_rx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = jobs_rx.take() else {
            return;
        };
        let shared: SharedJobReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..self.max_concurrent_requests {
            tokio::spawn(run_worker(shared.clone()));
        }
        info!(
            workers = self.max_concurrent_requests,
            clusters = self.clients.len(),
            "remote sampler workers started"
        );
    }
}

/// Number of clusters to sample for `percentage` of `total` clusters.
pub fn clusters_to_sample(total: usize, percentage: f64) -> usize {
    if total == 0 {
        return 0;
    }
    let count = (percentage * total as f64).ceil();
    if !count.is_finite() || count < 1.0 {
        return 1;
    }
    (count as usize).min(total)
}

/// Worker loop; ends when the manager and its job queue are dropped.
async fn run_worker(jobs: SharedJobReceiver) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        let cluster = job.client.cluster_name().to_string();
        let result = tokio::select! {
            _ = job.cancel.cancelled() => {
                RemoteNodesSamplerResult::Error(RemoteNodesSamplerError::new("sampling cancelled"))
            }
            outcome = job.client.sample_nodes(&job.request) => match outcome {
                Ok(resp) => RemoteNodesSamplerResult::Response(resp),
                Err(e) => {
                    debug!(cluster = %cluster, error = %e.message(), "remote sampling failed");
                    RemoteNodesSamplerResult::Error(e)
                }
            },
        };
        // The caller may have returned already.
        let _ = job.results.send((cluster, result)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_framework::{ClusterNode, Node, Pod};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSampler {
        name: String,
        fail: bool,
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl FakeSampler {
        fn new(name: &str, fail: bool) -> Self {
            Self {
                name: name.to_string(),
                fail,
                delay: Duration::ZERO,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl RemoteSamplerClient for FakeSampler {
        fn cluster_name(&self) -> &str {
            &self.name
        }

        fn sampling_strategy(&self) -> &str {
            "random"
        }

        async fn sample_nodes(
            &self,
            _request: &RemoteNodesSamplerRequest,
        ) -> Result<RemoteNodesSamplerResponse, RemoteNodesSamplerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(RemoteNodesSamplerError::new(format!("{} is down", self.name)));
            }
            let node = Arc::new(ClusterNode::new(Node::new(format!("{}-n1", self.name))));
            Ok(RemoteNodesSamplerResponse {
                nodes: vec![NodeInfo::new(self.name.clone(), node)],
            })
        }
    }

    fn request() -> RemoteNodesSamplerRequest {
        RemoteNodesSamplerRequest {
            pod_info: PodInfo::new(Pod::new("default", "p1")),
            nodes_to_sample_bp: 200,
        }
    }

    #[tokio::test]
    async fn partial_failures_are_reported_per_cluster() {
        let clients: Vec<Arc<dyn RemoteSamplerClient>> = (1..=4)
            .map(|i| {
                Arc::new(FakeSampler::new(&format!("cluster-{i}"), i == 2))
                    as Arc<dyn RemoteSamplerClient>
            })
            .collect();
        let manager = RemoteSamplerClientsManager::new(clients, 2);

        let results = manager
            .sample_nodes_from_all_clusters(request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results.values().filter(|r| r.is_error()).count(), 1);
        assert!(matches!(
            &results["cluster-2"],
            RemoteNodesSamplerResult::Error(e) if e.message() == "cluster-2 is down"
        ));
        assert!(matches!(
            &results["cluster-1"],
            RemoteNodesSamplerResult::Response(r) if r.nodes[0].cluster_name == "cluster-1"
        ));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let clients: Vec<Arc<dyn RemoteSamplerClient>> = (0..8)
            .map(|i| {
                let mut sampler = FakeSampler::new(&format!("c{i}"), false);
                sampler.delay = Duration::from_millis(20);
                sampler.in_flight = in_flight.clone();
                sampler.max_in_flight = max_in_flight.clone();
                Arc::new(sampler) as Arc<dyn RemoteSamplerClient>
            })
            .collect();
        let manager = RemoteSamplerClientsManager::new(clients, 3);

        let results = manager
            .sample_nodes_from_all_clusters(request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 8);
        assert!(max_in_flight.load(Ordering::SeqCst) <= 3);
        assert!(max_in_flight.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn percentage_picks_distinct_clusters() {
        let clients: Vec<Arc<dyn RemoteSamplerClient>> = (0..10)
            .map(|i| Arc::new(FakeSampler::new(&format!("c{i}"), false)) as Arc<dyn RemoteSamplerClient>)
            .collect();
        let manager = RemoteSamplerClientsManager::new(clients, 4);

        let results = manager
            .sample_nodes_from_clusters(request(), 0.25, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);

        let results = manager
            .sample_nodes_from_clusters(request(), 0.0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_unblocks_the_join() {
        let mut slow = FakeSampler::new("slow", false);
        slow.delay = Duration::from_secs(30);
        let slow: Arc<dyn RemoteSamplerClient> = Arc::new(slow);
        let manager = RemoteSamplerClientsManager::new(vec![slow], 1);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = manager
            .sample_nodes_from_all_clusters(request(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Cancelled));
    }

    #[test]
    fn cluster_count_rounds_up() {
        assert_eq!(clusters_to_sample(10, 0.25), 3);
        assert_eq!(clusters_to_sample(10, 1.0), 10);
        assert_eq!(clusters_to_sample(10, 2.0), 10);
        assert_eq!(clusters_to_sample(10, 0.0), 1);
        assert_eq!(clusters_to_sample(0, 0.5), 0);
    }

    #[tokio::test]
    async fn no_clusters_yields_empty_results() {
        let manager = RemoteSamplerClientsManager::new(Vec::new(), 2);
        let results = manager
            .sample_nodes_from_all_clusters(request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
