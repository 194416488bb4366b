//! Scheduler and cluster agent configuration.
//!
//! Both configs are read from TOML files. Every field is optional; missing
//! fields take the documented defaults.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FrameworkError, FrameworkResult};

pub const DEFAULT_SCHEDULER_NAME: &str = "polaris-scheduler";
pub const DEFAULT_SCHEDULER_LISTEN_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_CLUSTER_AGENT_LISTEN_ADDRESS: &str = "0.0.0.0:8081";
/// 2 % of all nodes.
pub const DEFAULT_NODES_TO_SAMPLE_BP: u32 = 200;
/// Pods accepted by the scheduler before submission blocks.
pub const DEFAULT_INCOMING_PODS_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_NODES_CACHE_UPDATE_INTERVAL_MS: u64 = 200;
pub const DEFAULT_NODES_CACHE_UPDATE_QUEUE_SIZE: usize = 1000;

/// Basis points in 100 %.
pub const MAX_BASIS_POINTS: u32 = 10_000;

/// Available parallelism, 1 if it cannot be determined. Pool sizes
/// default to multiples of this.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Free-form configuration block of a single plugin.
pub type PluginConfig = serde_json::Value;

/// Typed accessors for [`PluginConfig`] objects.
pub trait PluginConfigExt {
    fn read_string(&self, key: &str) -> Option<&str>;
    fn read_i64(&self, key: &str) -> Option<i64>;
    fn read_f64(&self, key: &str) -> Option<f64>;
    fn read_string_map(&self, key: &str) -> Option<BTreeMap<String, String>>;
}

impl PluginConfigExt for PluginConfig {
    fn read_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    fn read_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    fn read_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    fn read_string_map(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let object = self.get(key)?.as_object()?;
        object
            .iter()
            .map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect()
    }
}

/// A plugin reference in a stage list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginListEntry {
    pub name: String,
    /// Score plugins only. Missing or zero means 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl PluginListEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: None,
        }
    }

    pub fn with_weight(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight: Some(weight),
        }
    }

    pub fn effective_weight(&self) -> i64 {
        match self.weight {
            Some(w) if w > 0 => i64::from(w),
            _ => 1,
        }
    }
}

/// `{name, config}` entry of the `pluginsConfig` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsConfigEntry {
    pub name: String,
    #[serde(default)]
    pub config: PluginConfig,
}

/// The configuration block of `plugin_name`, if there is one.
pub fn find_plugin_config<'a>(
    entries: &'a [PluginsConfigEntry],
    plugin_name: &str,
) -> Option<&'a PluginConfig> {
    entries
        .iter()
        .find(|entry| entry.name == plugin_name)
        .map(|entry| &entry.config)
}

/// Plugins of the scheduler, per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulingPluginsList {
    pub sort: Option<PluginListEntry>,
    pub sample_nodes: Option<PluginListEntry>,
    pub pre_filter: Vec<PluginListEntry>,
    pub filter: Vec<PluginListEntry>,
    pub pre_score: Vec<PluginListEntry>,
    pub score: Vec<PluginListEntry>,
    pub reserve: Vec<PluginListEntry>,
}

/// Plugins of the cluster agent's sampling pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingPluginsList {
    pub sampling_strategies: Vec<PluginListEntry>,
    pub pre_filter: Vec<PluginListEntry>,
    pub filter: Vec<PluginListEntry>,
    pub pre_score: Vec<PluginListEntry>,
    pub score: Vec<PluginListEntry>,
}

/// Plugins of the cluster agent's binding pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BindingPluginsList {
    pub check_conflicts: Vec<PluginListEntry>,
}

/// Where to reach the cluster agent of a remote cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterConfig {
    /// e.g. `http://edge-a:8081`
    pub base_uri: String,
}

// ── Scheduler ──────────────────────────────────────────────────

/// Configuration of the multi-cluster scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub scheduler_name: String,
    /// Addresses the REST API binds to.
    pub listen_on: Vec<String>,
    /// Share of all nodes to sample per pod, in basis points.
    pub nodes_to_sample_bp: u32,
    pub parallel_node_samplers: usize,
    pub parallel_decision_pipelines: usize,
    pub incoming_pods_buffer_size: usize,
    pub plugins: SchedulingPluginsList,
    pub plugins_config: Vec<PluginsConfigEntry>,
    /// Cluster name to cluster agent/broker endpoint.
    pub remote_clusters: BTreeMap<String, RemoteClusterConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            listen_on: vec![DEFAULT_SCHEDULER_LISTEN_ADDRESS.to_string()],
            nodes_to_sample_bp: DEFAULT_NODES_TO_SAMPLE_BP,
            parallel_node_samplers: cpu_count() * 10,
            parallel_decision_pipelines: cpu_count(),
            incoming_pods_buffer_size: DEFAULT_INCOMING_PODS_BUFFER_SIZE,
            plugins: SchedulingPluginsList::default(),
            plugins_config: Vec::new(),
            remote_clusters: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> FrameworkResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> FrameworkResult<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FrameworkResult<()> {
        if self.scheduler_name.is_empty() {
            return Err(FrameworkError::Config("schedulerName must not be empty".into()));
        }
        if self.listen_on.is_empty() {
            return Err(FrameworkError::Config("listenOn must not be empty".into()));
        }
        if !(1..=MAX_BASIS_POINTS).contains(&self.nodes_to_sample_bp) {
            return Err(FrameworkError::Config(format!(
                "nodesToSampleBp must be between 1 and {MAX_BASIS_POINTS}, got {}",
                self.nodes_to_sample_bp
            )));
        }
        require_positive("parallelNodeSamplers", self.parallel_node_samplers)?;
        require_positive("parallelDecisionPipelines", self.parallel_decision_pipelines)?;
        require_positive("incomingPodsBufferSize", self.incoming_pods_buffer_size)?;
        Ok(())
    }

    pub fn plugin_config(&self, plugin_name: &str) -> Option<&PluginConfig> {
        find_plugin_config(&self.plugins_config, plugin_name)
    }
}

// ── Cluster agent ──────────────────────────────────────────────

/// Configuration of the agent of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterAgentConfig {
    pub cluster_name: String,
    /// Addresses the REST API binds to.
    pub listen_on: Vec<String>,
    pub nodes_cache_update_interval_ms: u64,
    pub nodes_cache_update_queue_size: usize,
    pub parallel_sampling_pipelines: usize,
    pub parallel_binding_pipelines: usize,
    /// Skip fetching node state for binding and read it from the nodes
    /// cache instead; the final commit runs asynchronously.
    pub cutoff_before_commit: bool,
    pub sampling_plugins: SamplingPluginsList,
    pub binding_plugins: BindingPluginsList,
    pub plugins_config: Vec<PluginsConfigEntry>,
    /// TOML file with the nodes of the in-memory cluster.
    pub nodes_file: Option<String>,
}

impl Default for ClusterAgentConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            listen_on: vec![DEFAULT_CLUSTER_AGENT_LISTEN_ADDRESS.to_string()],
            nodes_cache_update_interval_ms: DEFAULT_NODES_CACHE_UPDATE_INTERVAL_MS,
            nodes_cache_update_queue_size: DEFAULT_NODES_CACHE_UPDATE_QUEUE_SIZE,
            parallel_sampling_pipelines: cpu_count() * 10,
            parallel_binding_pipelines: cpu_count(),
            cutoff_before_commit: false,
            sampling_plugins: SamplingPluginsList::default(),
            binding_plugins: BindingPluginsList::default(),
            plugins_config: Vec::new(),
            nodes_file: None,
        }
    }
}

impl ClusterAgentConfig {
    pub fn from_file(path: &Path) -> FrameworkResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> FrameworkResult<Self> {
        let config: ClusterAgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FrameworkResult<()> {
        if self.cluster_name.is_empty() {
            return Err(FrameworkError::Config("clusterName must not be empty".into()));
        }
        if self.listen_on.is_empty() {
            return Err(FrameworkError::Config("listenOn must not be empty".into()));
        }
        require_positive(
            "nodesCacheUpdateIntervalMs",
            self.nodes_cache_update_interval_ms as usize,
        )?;
        require_positive("nodesCacheUpdateQueueSize", self.nodes_cache_update_queue_size)?;
        require_positive("parallelSamplingPipelines", self.parallel_sampling_pipelines)?;
        require_positive("parallelBindingPipelines", self.parallel_binding_pipelines)?;
        Ok(())
    }

    pub fn plugin_config(&self, plugin_name: &str) -> Option<&PluginConfig> {
        find_plugin_config(&self.plugins_config, plugin_name)
    }
}

fn require_positive(field: &str, value: usize) -> FrameworkResult<()> {
    if value == 0 {
        return Err(FrameworkError::Config(format!("{field} must be greater than 0")));
    }
    Ok(())
}
