//! The cluster agent's binding pipeline.
//!
//! ```text
//! lock node ─▶ fetch node + pods ─▶ CheckConflicts ─▶ queue on node ─▶ commit ─▶ unlock
//! ```
//!
//! The whole pipeline runs under the entity lock of the target node, so at
//! most one decision per node is bound at a time. The pod is queued on the
//! node in the nodes cache while the commit is in flight, so concurrent
//! sampling already sees its resources as taken.

use std::sync::Arc;

use polaris_collections::EntityLocker;
use polaris_framework::status::CHECK_CONFLICTS_STAGE;
use polaris_framework::{
    BindingPipelinePlugins, BindingPipelineStopwatches, ClusterAgentServices, ClusterNode,
    ClusterPod, ClusterSchedulingDecision, CommitSchedulingDecisionSuccess,
    CommitSchedulingDecisionTimings, NodeInfo, PodInfo, PodQueuedOnNode, SchedulingContext,
    SchedulingDecision, StageResult, Status, StatusCode,
};
use tracing::{debug, error, warn};

pub const ERROR_FETCHING_NODE_INFO: &str = "error fetching node information";
pub const ERROR_COMMITTING_DECISION: &str = "error committing scheduling decision";

pub struct BindingPipeline {
    id: usize,
    plugins: BindingPipelinePlugins,
    services: ClusterAgentServices,
    nodes_locker: EntityLocker,
}

impl BindingPipeline {
    /// `nodes_locker` must be shared by all binding pipelines of the agent.
    pub fn new(
        id: usize,
        plugins: BindingPipelinePlugins,
        services: ClusterAgentServices,
        nodes_locker: EntityLocker,
    ) -> Self {
        Self {
            id,
            plugins,
            services,
            nodes_locker,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Re-check `decision` against the current state of its node and commit
    /// it to the cluster. Conflicts and commit failures are `Unschedulable`.
    pub async fn commit_scheduling_decision(
        &self,
        ctx: &SchedulingContext,
        decision: &ClusterSchedulingDecision,
    ) -> StageResult<CommitSchedulingDecisionSuccess> {
        let stopwatches = BindingPipelineStopwatches::of(ctx);
        let node_name = decision.node_name.as_str();

        stopwatches.node_lock_time.start();
        let Some(node_lock) = self
            .nodes_locker
            .lock_cancellable(node_name, ctx.cancellation_token())
            .await
        else {
            return Err(Status::unschedulable(format!(
                "cancelled while waiting for the lock on node {node_name}"
            )));
        };
        stopwatches.node_lock_time.stop();

        stopwatches.fetch_node_info.start();
        let node_info = self.fetch_node_info(decision).await;
        stopwatches.fetch_node_info.stop();
        let node_info = node_info.map_err(|e| {
            Status::new(
                StatusCode::Unschedulable,
                [ERROR_FETCHING_NODE_INFO.to_string(), format!("{e:#}")],
            )
        })?;

        let scheduling_decision = SchedulingDecision {
            pod: Arc::new(PodInfo::new(decision.pod.clone())),
            target_node: node_info,
        };
        stopwatches.binding_pipeline.start();
        let checked = self.run_check_conflicts_plugins(ctx, &scheduling_decision);
        stopwatches.binding_pipeline.stop();
        checked?;

        stopwatches.commit_decision.start();
        let committed = self.commit(decision).await;
        stopwatches.commit_decision.stop();
        node_lock.unlock();

        let mut success = committed?;
        success.timings = CommitSchedulingDecisionTimings {
            queue_time: stopwatches.queue_time.duration_ms(),
            node_lock_time: stopwatches.node_lock_time.duration_ms(),
            fetch_node_info: stopwatches.fetch_node_info.duration_ms(),
            binding_pipeline: stopwatches.binding_pipeline.duration_ms(),
            commit_decision: stopwatches.commit_decision.duration_ms(),
            ..success.timings
        };
        Ok(success)
    }

    async fn fetch_node_info(&self, decision: &ClusterSchedulingDecision) -> anyhow::Result<NodeInfo> {
        let cluster_name = self.services.cluster_name().to_string();
        if self.services.config.cutoff_before_commit {
            return self
                .cached_node_info(decision)
                .map(|node| NodeInfo::new(cluster_name, Arc::new(node)));
        }

        let client = &self.services.cluster_client;
        let (node, pods) = tokio::join!(
            client.fetch_node(&decision.node_name),
            client.fetch_pods_scheduled_on_node(&decision.node_name),
        );
        let pods = pods?
            .iter()
            .map(|pod| Arc::new(ClusterPod::from_pod(pod)))
            .collect();
        let node = ClusterNode::with_pods(node?, pods, Vec::new());
        Ok(NodeInfo::new(cluster_name, Arc::new(node)))
    }

    /// A copy of the cached node. If the cache already accounts for the pod
    /// being bound, its resources are handed back in the copy.
    fn cached_node_info(&self, decision: &ClusterSchedulingDecision) -> anyhow::Result<ClusterNode> {
        let reader = self.services.nodes_cache.nodes().read_lock();
        let Some(cached) = reader.get_by_key(&decision.node_name) else {
            anyhow::bail!("cannot find node {} in the cache", decision.node_name);
        };
        let namespace = &decision.pod.metadata.namespace;
        let name = &decision.pod.metadata.name;
        let others = |pods: &[Arc<ClusterPod>]| -> Vec<Arc<ClusterPod>> {
            pods.iter()
                .filter(|p| !p.is_same_pod(namespace, name))
                .cloned()
                .collect()
        };
        Ok(ClusterNode::with_pods(
            cached.node.clone(),
            others(&cached.pods),
            others(&cached.queued_pods),
        ))
    }

    fn run_check_conflicts_plugins(
        &self,
        ctx: &SchedulingContext,
        decision: &SchedulingDecision,
    ) -> StageResult {
        for plugin in &self.plugins.check_conflicts {
            plugin
                .check_for_conflicts(ctx, decision)
                .map_err(|status| status.with_failed_plugin(plugin.name(), CHECK_CONFLICTS_STAGE))?;
        }
        Ok(())
    }

    async fn commit(
        &self,
        decision: &ClusterSchedulingDecision,
    ) -> StageResult<CommitSchedulingDecisionSuccess> {
        let queued = self
            .services
            .nodes_cache
            .queue_pod_on_node(&decision.pod, &decision.node_name);
        if queued.is_none() {
            debug!(node = %decision.node_name, "target node is not in the nodes cache");
        }

        if self.services.config.cutoff_before_commit {
            let client = self.services.cluster_client.clone();
            let spawned_decision = decision.clone();
            tokio::spawn(async move {
                let result = client.commit_scheduling_decision(&spawned_decision).await;
                finish_queued(queued.as_deref(), result.is_ok());
                if let Err(e) = result {
                    error!(
                        pod = %spawned_decision.pod.key(),
                        node = %spawned_decision.node_name,
                        error = %format!("{e:#}"),
                        "asynchronous commit failed"
                    );
                }
            });
            return Ok(CommitSchedulingDecisionSuccess {
                namespace: decision.pod.metadata.namespace.clone(),
                pod_name: decision.pod.metadata.name.clone(),
                node_name: decision.node_name.clone(),
                timings: CommitSchedulingDecisionTimings::default(),
            });
        }

        let result = self
            .services
            .cluster_client
            .commit_scheduling_decision(decision)
            .await;
        finish_queued(queued.as_deref(), result.is_ok());
        result.map_err(|e| {
            warn!(
                pipeline = self.id,
                pod = %decision.pod.key(),
                node = %decision.node_name,
                error = %format!("{e:#}"),
                "commit failed"
            );
            Status::new(
                StatusCode::Unschedulable,
                [ERROR_COMMITTING_DECISION.to_string(), format!("{e:#}")],
            )
        })
    }
}

fn finish_queued(queued: Option<&dyn PodQueuedOnNode>, committed: bool) {
    let Some(queued) = queued else {
        return;
    };
    if committed {
        queued.mark_as_committed();
    } else {
        queued.remove_from_queue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_cluster::{ClusterNodesCache, InMemoryClusterClient};
    use polaris_framework::resources::RESOURCE_CPU;
    use polaris_framework::{
        CheckConflictsPlugin, ClusterAgentConfig, Container, LocalClusterClient, Node, NodesCache,
        Plugin, Pod, Quantity,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        client: Arc<InMemoryClusterClient>,
        cache: Arc<ClusterNodesCache>,
        services: ClusterAgentServices,
    }

    fn node(name: &str, milli_cpu: i64) -> Node {
        let mut node = Node::new(name);
        node.status
            .allocatable
            .insert(RESOURCE_CPU.into(), Quantity::from_milli(milli_cpu));
        node
    }

    fn pod(name: &str, milli_cpu: i64) -> Pod {
        let mut pod = Pod::new("default", name);
        let mut container = Container::default();
        container
            .resources
            .limits
            .insert(RESOURCE_CPU.into(), Quantity::from_milli(milli_cpu));
        pod.spec.containers.push(container);
        pod
    }

    fn harness(cutoff_before_commit: bool) -> Harness {
        let nodes = vec![node("n1", 2000), node("n2", 2000)];
        let cache = Arc::new(ClusterNodesCache::new(Duration::from_millis(5), 64));
        cache.load_nodes(nodes.clone());
        let client = Arc::new(InMemoryClusterClient::new("c1", nodes).with_cache_updates(cache.updates()));
        let config = ClusterAgentConfig {
            cluster_name: "c1".into(),
            cutoff_before_commit,
            ..Default::default()
        };
        let services = ClusterAgentServices {
            config: Arc::new(config),
            cluster_client: client.clone(),
            nodes_cache: cache.clone(),
        };
        Harness {
            client,
            cache,
            services,
        }
    }

    fn decision(name: &str, node: &str) -> ClusterSchedulingDecision {
        ClusterSchedulingDecision {
            pod: pod(name, 500),
            node_name: node.into(),
        }
    }

    fn pipeline(h: &Harness, check_conflicts: Vec<Arc<dyn CheckConflictsPlugin>>) -> BindingPipeline {
        BindingPipeline::new(
            0,
            BindingPipelinePlugins { check_conflicts },
            h.services.clone(),
            EntityLocker::new(),
        )
    }

    struct RejectAll;

    impl Plugin for RejectAll {
        fn name(&self) -> &str {
            "RejectAll"
        }
    }

    impl CheckConflictsPlugin for RejectAll {
        fn check_for_conflicts(&self, _: &SchedulingContext, _: &SchedulingDecision) -> StageResult {
            Err(Status::unschedulable("node is full"))
        }
    }

    /// Records the highest number of concurrent checks on any node.
    #[derive(Default)]
    struct Overlap {
        active: AtomicUsize,
        max_active: AtomicUsize,
        seen_available_cpu: std::sync::Mutex<Vec<i64>>,
    }

    impl Plugin for Overlap {
        fn name(&self) -> &str {
            "Overlap"
        }
    }

    impl CheckConflictsPlugin for Overlap {
        fn check_for_conflicts(&self, _: &SchedulingContext, decision: &SchedulingDecision) -> StageResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.seen_available_cpu
                .lock()
                .unwrap()
                .push(decision.target_node.node.available_resources.milli_cpu);
            std::thread::sleep(Duration::from_millis(10));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn commits_and_binds_the_pod() {
        let h = harness(false);
        let pipeline = pipeline(&h, Vec::new());
        let ctx = SchedulingContext::default();

        let success = pipeline
            .commit_scheduling_decision(&ctx, &decision("p1", "n1"))
            .await
            .unwrap();
        assert_eq!(success.pod_name, "p1");
        assert_eq!(success.node_name, "n1");
        assert_eq!(h.client.fetch_pods_scheduled_on_node("n1").await.unwrap().len(), 1);

        let reader = h.cache.nodes().read_lock();
        let cached = reader.get_by_key("n1").unwrap();
        assert_eq!(cached.pods.len(), 1);
        assert!(cached.queued_pods.is_empty());
        assert_eq!(cached.available_resources.milli_cpu, 1500);
    }

    #[tokio::test]
    async fn conflicts_are_tagged_and_nothing_is_committed() {
        let h = harness(false);
        let pipeline = pipeline(&h, vec![Arc::new(RejectAll)]);

        let status = pipeline
            .commit_scheduling_decision(&SchedulingContext::default(), &decision("p1", "n1"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), StatusCode::Unschedulable);
        assert_eq!(status.failed_plugin(), Some("RejectAll"));
        assert_eq!(status.failed_stage(), Some(CHECK_CONFLICTS_STAGE));
        assert!(h.client.pods().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_releases_queued_resources() {
        let h = harness(false);
        let pipeline = pipeline(&h, Vec::new());
        let ctx = SchedulingContext::default();
        pipeline
            .commit_scheduling_decision(&ctx, &decision("p1", "n1"))
            .await
            .unwrap();

        let status = pipeline
            .commit_scheduling_decision(&SchedulingContext::default(), &decision("p1", "n2"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), StatusCode::Unschedulable);
        assert_eq!(status.reasons()[0], ERROR_COMMITTING_DECISION);

        let reader = h.cache.nodes().read_lock();
        let n2 = reader.get_by_key("n2").unwrap();
        assert!(n2.queued_pods.is_empty());
        assert_eq!(n2.available_resources.milli_cpu, 2000);
    }

    #[tokio::test]
    async fn unknown_node_cannot_be_fetched() {
        let h = harness(false);
        let pipeline = pipeline(&h, Vec::new());

        let status = pipeline
            .commit_scheduling_decision(&SchedulingContext::default(), &decision("p1", "nope"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), StatusCode::Unschedulable);
        assert_eq!(status.reasons()[0], ERROR_FETCHING_NODE_INFO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn decisions_for_one_node_are_serialized() {
        let h = harness(false);
        let overlap = Arc::new(Overlap::default());
        let locker = EntityLocker::new();
        let pipelines: Vec<Arc<BindingPipeline>> = (0..4)
            .map(|id| {
                Arc::new(BindingPipeline::new(
                    id,
                    BindingPipelinePlugins {
                        check_conflicts: vec![overlap.clone() as Arc<dyn CheckConflictsPlugin>],
                    },
                    h.services.clone(),
                    locker.clone(),
                ))
            })
            .collect();

        let tasks: Vec<_> = pipelines
            .into_iter()
            .enumerate()
            .map(|(i, pipeline)| {
                tokio::spawn(async move {
                    pipeline
                        .commit_scheduling_decision(
                            &SchedulingContext::default(),
                            &decision(&format!("p{i}"), "n1"),
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(overlap.max_active.load(Ordering::SeqCst), 1);
        // Every check saw the pods committed before it.
        let mut seen = overlap.seen_available_cpu.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![500, 1000, 1500, 2000]);
        assert_eq!(locker.active_locks(), 0);
    }

    #[tokio::test]
    async fn cutoff_commits_asynchronously_from_cached_state() {
        let h = harness(true);
        let pipeline = pipeline(&h, Vec::new());

        let success = pipeline
            .commit_scheduling_decision(&SchedulingContext::default(), &decision("p1", "n2"))
            .await
            .unwrap();
        assert_eq!(success.node_name, "n2");

        for _ in 0..100 {
            if !h.client.pods().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.client.pods().len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reader = h.cache.nodes().read_lock();
        assert_eq!(reader.get_by_key("n2").unwrap().pods.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_lock_wait_gives_up() {
        let h = harness(false);
        let locker = EntityLocker::new();
        let pipeline = BindingPipeline::new(0, BindingPipelinePlugins::default(), h.services.clone(), locker.clone());
        let _held = locker.lock("n1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = pipeline
            .commit_scheduling_decision(&SchedulingContext::new(cancel), &decision("p1", "n1"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), StatusCode::Unschedulable);
        assert!(h.client.pods().is_empty());
    }

    #[tokio::test]
    async fn timings_are_reported() {
        let h = harness(false);
        let pipeline = pipeline(&h, Vec::new());
        let ctx = SchedulingContext::default();
        BindingPipelineStopwatches::of(&ctx)
            .queue_time
            .start_at(std::time::Instant::now() - Duration::from_millis(25));
        BindingPipelineStopwatches::of(&ctx).queue_time.stop();

        let success = pipeline
            .commit_scheduling_decision(&ctx, &decision("p1", "n1"))
            .await
            .unwrap();
        assert!(success.timings.queue_time >= 25);
    }
}
