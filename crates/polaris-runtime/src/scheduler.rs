//! The Polaris scheduler runtime.
//!
//! ```text
//! submit_pod ─▶ incoming (mpsc) ─▶ pump ─▶ PrioritySchedulingQueue
//!                                                  │ dequeue
//!                        ┌─────────────────────────┼──────────────────────┐
//!                  sampling loop 1   ...     sampling loop N   (SampleNodes)
//!                        └─────────────┬───────────┴──────────────────────┘
//!                                      ▼ bounded queue (400)
//!                decision pump 1  ...  decision pump M   (DecisionPipeline)
//!                                      │
//!                                      ▼ spawned
//!                     ClusterClient::commit_scheduling_decision
//! ```

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use polaris_framework::status::SAMPLE_NODES_STAGE;
use polaris_framework::{
    ClusterSchedulingDecision, Pod, PluginsRegistry, PrioritySchedulingQueue, QueuedPodInfo,
    SampleNodesPlugin, SampledPodInfo, SchedulerServices, SchedulingContext, SchedulingDecision,
    SchedulingStopwatches, Status,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::decision_pipeline::DecisionPipeline;
use crate::error::{RuntimeError, RuntimeResult};
use crate::plugin_factories::{
    new_decision_pipeline_plugins, new_sample_nodes_plugin, new_sort_plugin,
};

/// Capacity of the queue between the sampling loops and the decision pumps.
pub const DECISION_PIPELINE_QUEUE_SIZE: usize = 400;

const PRISTINE: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

fn state_name(state: u8) -> &'static str {
    match state {
        PRISTINE => "pristine",
        STARTED => "started",
        _ => "stopped",
    }
}

/// A pod submitted for scheduling.
#[derive(Debug)]
struct IncomingPod {
    pod: Pod,
    received_at: Instant,
}

/// Point-in-time view of the scheduler's work in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub pods_in_queue: usize,
    pub pods_in_sampling: usize,
    pub pods_waiting_for_decision_pipeline: usize,
    pub pods_in_decision_pipeline: usize,
    pub pods_scheduled: u64,
    pub pods_failed: u64,
}

#[derive(Default)]
struct Counters {
    in_sampling: AtomicUsize,
    waiting_for_decision_pipeline: AtomicUsize,
    in_decision_pipeline: AtomicUsize,
    scheduled: AtomicU64,
    failed: AtomicU64,
}

struct Running {
    queue: Arc<PrioritySchedulingQueue>,
    cancel: CancellationToken,
}

type SharedSampledReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<SampledPodInfo>>>;

pub struct PolarisScheduler {
    services: SchedulerServices,
    registry: PluginsRegistry<SchedulerServices>,
    state: AtomicU8,
    incoming_tx: mpsc::Sender<IncomingPod>,
    incoming_rx: Mutex<Option<mpsc::Receiver<IncomingPod>>>,
    running: OnceLock<Running>,
    counters: Counters,
}

impl PolarisScheduler {
    pub fn new(services: SchedulerServices, registry: PluginsRegistry<SchedulerServices>) -> Self {
        let (incoming_tx, incoming_rx) =
            mpsc::channel(services.config.incoming_pods_buffer_size.max(1));
        Self {
            services,
            registry,
            state: AtomicU8::new(PRISTINE),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            running: OnceLock::new(),
            counters: Counters::default(),
        }
    }

    pub fn services(&self) -> &SchedulerServices {
        &self.services
    }

    /// Create all plugins and start the pump, the sampling loops and the
    /// decision pumps. The scheduler stops when `cancel` fires.
    pub fn start(self: &Arc<Self>, cancel: &CancellationToken) -> RuntimeResult<()> {
        if let Err(state) =
            self.state
                .compare_exchange(PRISTINE, STARTED, Ordering::SeqCst, Ordering::SeqCst)
        {
            return Err(RuntimeError::InvalidState {
                action: "start scheduler",
                state: state_name(state),
            });
        }
        if let Err(e) = self.start_workers(cancel) {
            self.state.store(STOPPED, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn start_workers(self: &Arc<Self>, parent: &CancellationToken) -> RuntimeResult<()> {
        let config = &self.services.config;

        // Build every plugin first so a broken config starts nothing.
        let sort = new_sort_plugin(&self.registry, &self.services)?;
        let samplers = (0..config.parallel_node_samplers)
            .map(|_| new_sample_nodes_plugin(&self.registry, &self.services))
            .collect::<RuntimeResult<Vec<_>>>()?;
        let pipelines = (0..config.parallel_decision_pipelines)
            .map(|id| {
                let plugins = new_decision_pipeline_plugins(&self.registry, &self.services)?;
                Ok(DecisionPipeline::new(id, plugins))
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        let incoming = self
            .incoming_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(RuntimeError::InvalidState {
                action: "start scheduler",
                state: "started",
            })?;

        let cancel = parent.child_token();
        let queue = Arc::new(PrioritySchedulingQueue::new(sort));
        let running = Running {
            queue: queue.clone(),
            cancel: cancel.clone(),
        };
        if self.running.set(running).is_err() {
            return Err(RuntimeError::InvalidState {
                action: "start scheduler",
                state: "started",
            });
        }

        tokio::spawn(self.clone().pump_into_queue(incoming, queue.clone(), cancel.clone()));

        let (decisions_tx, decisions_rx) = mpsc::channel(DECISION_PIPELINE_QUEUE_SIZE);
        for (id, sampler) in samplers.into_iter().enumerate() {
            tokio::spawn(self.clone().run_sampling_loop(
                id,
                sampler,
                queue.clone(),
                decisions_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(decisions_tx);

        let decisions_rx: SharedSampledReceiver = Arc::new(tokio::sync::Mutex::new(decisions_rx));
        for pipeline in pipelines {
            tokio::spawn(self.clone().run_decision_pump(
                pipeline,
                decisions_rx.clone(),
                cancel.clone(),
            ));
        }

        // Follow the caller's cancellation.
        let this = self.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            this.stop();
        });

        info!(
            scheduler = %config.scheduler_name,
            node_samplers = config.parallel_node_samplers,
            decision_pipelines = config.parallel_decision_pipelines,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop all workers. Queued pods are dropped.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(STARTED, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(running) = self.running.get() {
            running.cancel.cancel();
            running.queue.close();
        }
        info!(scheduler = %self.services.config.scheduler_name, "scheduler stopped");
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STARTED
    }

    pub fn state(&self) -> &'static str {
        state_name(self.state.load(Ordering::SeqCst))
    }

    /// Hand a pod to the scheduler. Waits while the incoming buffer is full.
    pub async fn submit_pod(&self, pod: Pod) -> RuntimeResult<()> {
        if !self.is_active() {
            return Err(RuntimeError::NotAccepting);
        }
        let incoming = IncomingPod {
            pod,
            received_at: Instant::now(),
        };
        self.incoming_tx
            .send(incoming)
            .await
            .map_err(|_| RuntimeError::NotAccepting)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pods_in_queue: self.running.get().map_or(0, |r| r.queue.len()),
            pods_in_sampling: self.counters.in_sampling.load(Ordering::SeqCst),
            pods_waiting_for_decision_pipeline: self
                .counters
                .waiting_for_decision_pipeline
                .load(Ordering::SeqCst),
            pods_in_decision_pipeline: self.counters.in_decision_pipeline.load(Ordering::SeqCst),
            pods_scheduled: self.counters.scheduled.load(Ordering::SeqCst),
            pods_failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    // ── Workers ────────────────────────────────────────────────

    async fn pump_into_queue(
        self: Arc<Self>,
        mut incoming: mpsc::Receiver<IncomingPod>,
        queue: Arc<PrioritySchedulingQueue>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = incoming.recv() => next,
            };
            let Some(IncomingPod { pod, received_at }) = next else {
                self.stop();
                break;
            };

            let ctx = SchedulingContext::new(cancel.child_token());
            let stopwatches = SchedulingStopwatches::of(&ctx);
            stopwatches.end_to_end.start_at(received_at);
            stopwatches.queue_time.start();
            queue.enqueue(QueuedPodInfo::new(pod, ctx, 0));
        }
        debug!("incoming pods pump stopped");
    }

    async fn run_sampling_loop(
        self: Arc<Self>,
        id: usize,
        sampler: Arc<dyn SampleNodesPlugin>,
        queue: Arc<PrioritySchedulingQueue>,
        decisions: mpsc::Sender<SampledPodInfo>,
        cancel: CancellationToken,
    ) {
        debug!(sampler = id, plugin = %sampler.name(), "sampling loop started");
        while let Some(pod) = queue.dequeue_cancellable(&cancel).await {
            let stopwatches = SchedulingStopwatches::of(&pod.ctx);
            stopwatches.queue_time.stop();
            stopwatches.pipeline.start();

            self.counters.in_sampling.fetch_add(1, Ordering::SeqCst);
            let sampled = sampler.sample_nodes(&pod.ctx, &pod.pod_info).await;
            self.counters.in_sampling.fetch_sub(1, Ordering::SeqCst);

            let nodes = match sampled {
                Ok(nodes) if nodes.is_empty() => {
                    let status = Status::unschedulable("the SampleNodes plugin returned 0 nodes")
                        .with_failed_plugin(sampler.name(), SAMPLE_NODES_STAGE);
                    self.scheduling_failed(&pod, &status);
                    continue;
                }
                Ok(nodes) => nodes,
                Err(status) => {
                    let status = status.with_failed_plugin(sampler.name(), SAMPLE_NODES_STAGE);
                    self.scheduling_failed(&pod, &status);
                    continue;
                }
            };

            self.counters
                .waiting_for_decision_pipeline
                .fetch_add(1, Ordering::SeqCst);
            let sampled = SampledPodInfo {
                queued: pod,
                sampled_nodes: nodes,
            };
            let sent = tokio::select! {
                _ = cancel.cancelled() => false,
                sent = decisions.send(sampled) => sent.is_ok(),
            };
            if !sent {
                self.counters
                    .waiting_for_decision_pipeline
                    .fetch_sub(1, Ordering::SeqCst);
                break;
            }
        }
        debug!(sampler = id, "sampling loop stopped");
    }

    async fn run_decision_pump(
        self: Arc<Self>,
        pipeline: DecisionPipeline,
        decisions: SharedSampledReceiver,
        cancel: CancellationToken,
    ) {
        debug!(pipeline = pipeline.id(), "decision pump started");
        loop {
            let next = {
                let mut rx = decisions.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    next = rx.recv() => next,
                }
            };
            let Some(SampledPodInfo {
                queued,
                sampled_nodes,
            }) = next
            else {
                break;
            };

            self.counters
                .waiting_for_decision_pipeline
                .fetch_sub(1, Ordering::SeqCst);
            self.counters.in_decision_pipeline.fetch_add(1, Ordering::SeqCst);
            let result = pipeline.schedule_pod(&queued, sampled_nodes);
            self.counters.in_decision_pipeline.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(decision) => {
                    tokio::spawn(self.clone().commit_decision(queued, decision));
                }
                Err(status) => self.scheduling_failed(&queued, &status),
            }
        }
        debug!(pipeline = pipeline.id(), "decision pump stopped");
    }

    async fn commit_decision(self: Arc<Self>, pod: QueuedPodInfo, decision: SchedulingDecision) {
        let stopwatches = SchedulingStopwatches::of(&pod.ctx);
        stopwatches.pipeline.stop();

        let target = &decision.target_node;
        let target_node = format!("{}.{}", target.cluster_name, target.name());
        let client = match self.services.cluster_clients.get(&target.cluster_name) {
            Ok(client) => client,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(pod = %pod.key(), target_node = %target_node, error = %e, "FailedScheduling");
                return;
            }
        };

        let cluster_decision = ClusterSchedulingDecision {
            pod: decision.pod.pod.as_ref().clone(),
            node_name: target.name().to_string(),
        };
        stopwatches.commit.start();
        let committed = client.commit_scheduling_decision(&cluster_decision).await;
        stopwatches.commit.stop();
        stopwatches.end_to_end.stop();

        match committed {
            Ok(_) => {
                self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
                info!(
                    pod = %pod.key(),
                    target_node = %target_node,
                    queue_time_ms = stopwatches.queue_time.duration_ms(),
                    pipeline_duration_ms = stopwatches.pipeline.duration_ms(),
                    commit_duration_ms = stopwatches.commit.duration_ms(),
                    e2e_duration_ms = stopwatches.end_to_end.duration_ms(),
                    "SchedulingSuccess"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                info!(
                    pod = %pod.key(),
                    target_node = %target_node,
                    queue_time_ms = stopwatches.queue_time.duration_ms(),
                    pipeline_duration_ms = stopwatches.pipeline.duration_ms(),
                    e2e_duration_ms = stopwatches.end_to_end.duration_ms(),
                    reason = %format!("{e:#}"),
                    "FailedScheduling"
                );
            }
        }
    }

    fn scheduling_failed(&self, pod: &QueuedPodInfo, status: &Status) {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        let stopwatches = SchedulingStopwatches::of(&pod.ctx);
        stopwatches.pipeline.stop();
        stopwatches.end_to_end.stop();
        info!(
            pod = %pod.key(),
            stage = status.failed_stage().unwrap_or_default(),
            plugin = status.failed_plugin().unwrap_or_default(),
            reason = %status.message(),
            pipeline_duration_ms = stopwatches.pipeline.duration_ms(),
            e2e_duration_ms = stopwatches.end_to_end.duration_ms(),
            "FailedScheduling"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use polaris_framework::config::PluginListEntry;
    use polaris_framework::{
        ClusterClient, ClusterNode, CommitSchedulingDecisionSuccess,
        CommitSchedulingDecisionTimings, Node, NodeInfo, Plugin, PodInfo, SchedulerConfig,
        SortPlugin, StageResult, StaticClusterClientsManager,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct ByPriority;

    impl Plugin for ByPriority {
        fn name(&self) -> &str {
            "ByPriority"
        }

        fn as_sort(self: Arc<Self>) -> Option<Arc<dyn SortPlugin>> {
            Some(self)
        }
    }

    impl SortPlugin for ByPriority {
        fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool {
            a.pod().priority() > b.pod().priority()
        }
    }

    /// Offers two nodes of cluster `c1`, none for pods named `lonely`.
    struct TwoNodes;

    impl Plugin for TwoNodes {
        fn name(&self) -> &str {
            "TwoNodes"
        }

        fn as_sample_nodes(self: Arc<Self>) -> Option<Arc<dyn SampleNodesPlugin>> {
            Some(self)
        }
    }

    #[async_trait]
    impl SampleNodesPlugin for TwoNodes {
        async fn sample_nodes(
            &self,
            _: &SchedulingContext,
            pod: &PodInfo,
        ) -> StageResult<Vec<NodeInfo>> {
            if pod.pod.metadata.name == "lonely" {
                return Ok(Vec::new());
            }
            Ok(["n1", "n2"]
                .iter()
                .map(|name| NodeInfo::new("c1", Arc::new(ClusterNode::new(Node::new(*name)))))
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingCluster {
        committed: Mutex<Vec<ClusterSchedulingDecision>>,
    }

    #[async_trait]
    impl ClusterClient for RecordingCluster {
        fn cluster_name(&self) -> &str {
            "c1"
        }

        async fn commit_scheduling_decision(
            &self,
            decision: &ClusterSchedulingDecision,
        ) -> anyhow::Result<CommitSchedulingDecisionSuccess> {
            self.committed.lock().unwrap().push(decision.clone());
            Ok(CommitSchedulingDecisionSuccess {
                namespace: decision.pod.metadata.namespace.clone(),
                pod_name: decision.pod.metadata.name.clone(),
                node_name: decision.node_name.clone(),
                timings: CommitSchedulingDecisionTimings::default(),
            })
        }
    }

    fn registry() -> PluginsRegistry<SchedulerServices> {
        let mut registry = PluginsRegistry::new();
        registry.register("ByPriority", |_, _: &SchedulerServices| {
            Ok(Arc::new(ByPriority) as Arc<dyn Plugin>)
        });
        registry.register("TwoNodes", |_, _: &SchedulerServices| {
            Ok(Arc::new(TwoNodes) as Arc<dyn Plugin>)
        });
        registry
    }

    fn scheduler(with_sort: bool) -> (Arc<PolarisScheduler>, Arc<RecordingCluster>) {
        let mut config = SchedulerConfig {
            parallel_node_samplers: 2,
            parallel_decision_pipelines: 2,
            ..Default::default()
        };
        config.plugins.sort = with_sort.then(|| PluginListEntry::new("ByPriority"));
        config.plugins.sample_nodes = Some(PluginListEntry::new("TwoNodes"));

        let cluster = Arc::new(RecordingCluster::default());
        let mut clients: BTreeMap<String, Arc<dyn ClusterClient>> = BTreeMap::new();
        clients.insert("c1".into(), cluster.clone());
        let services = SchedulerServices {
            config: Arc::new(config),
            cluster_clients: Arc::new(StaticClusterClientsManager::new(clients)),
        };
        (Arc::new(PolarisScheduler::new(services, registry())), cluster)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn schedules_submitted_pods() {
        let (scheduler, cluster) = scheduler(true);
        let cancel = CancellationToken::new();
        scheduler.start(&cancel).unwrap();
        assert_eq!(scheduler.state(), "started");

        for i in 0..5 {
            scheduler
                .submit_pod(Pod::new("default", format!("p{i}")))
                .await
                .unwrap();
        }
        wait_for(|| cluster.committed.lock().unwrap().len() == 5).await;

        let committed = cluster.committed.lock().unwrap().clone();
        assert!(committed.iter().all(|d| d.node_name == "n1" || d.node_name == "n2"));
        wait_for(|| scheduler.stats().pods_scheduled == 5).await;
        let stats = scheduler.stats();
        assert_eq!(stats.pods_in_decision_pipeline, 0);
        assert_eq!(stats.pods_waiting_for_decision_pipeline, 0);
        scheduler.stop();
    }

    #[tokio::test]
    async fn pods_without_candidates_fail() {
        let (scheduler, cluster) = scheduler(true);
        scheduler.start(&CancellationToken::new()).unwrap();

        scheduler.submit_pod(Pod::new("default", "lonely")).await.unwrap();
        wait_for(|| scheduler.stats().pods_failed == 1).await;
        assert!(cluster.committed.lock().unwrap().is_empty());
        scheduler.stop();
    }

    #[tokio::test]
    async fn rejects_pods_unless_started() {
        let (scheduler, _) = scheduler(true);
        let err = scheduler.submit_pod(Pod::new("default", "early")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotAccepting));

        scheduler.start(&CancellationToken::new()).unwrap();
        scheduler.stop();
        assert_eq!(scheduler.state(), "stopped");
        let err = scheduler.submit_pod(Pod::new("default", "late")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotAccepting));
    }

    #[tokio::test]
    async fn missing_sort_plugin_prevents_start() {
        let (scheduler, _) = scheduler(false);
        let err = scheduler.start(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::MissingPlugin(stage) if stage == "Sort"));

        let err = scheduler.start(&CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidState { state: "stopped", .. }
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_the_scheduler() {
        let (scheduler, _) = scheduler(true);
        let cancel = CancellationToken::new();
        scheduler.start(&cancel).unwrap();

        cancel.cancel();
        wait_for(|| !scheduler.is_active()).await;
        assert_eq!(scheduler.state(), "stopped");
    }
}
