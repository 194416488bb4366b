//! Builds the plugin sets of the pipelines from the configured stage lists.
//!
//! Every call uses a fresh [`PluginSetup`], so each pipeline instance owns
//! its plugins. Sampling strategies are the exception: they are created once
//! and shared by all sampling pipelines.

use std::sync::Arc;

use polaris_framework::status::{
    CHECK_CONFLICTS_STAGE, FILTER_STAGE, PRE_FILTER_STAGE, PRE_SCORE_STAGE, RESERVE_STAGE,
    SAMPLE_NODES_STAGE, SAMPLING_STRATEGY_STAGE, SCORE_STAGE, SORT_STAGE,
};
use polaris_framework::{
    BindingPipelinePlugins, ClusterAgentServices, DecisionPipelinePlugins, PluginSetup,
    PluginsRegistry, SampleNodesPlugin, SamplingPipelinePlugins,
    SamplingStrategyPlugin, SchedulerServices, SortPlugin,
};

use crate::error::{RuntimeError, RuntimeResult};

/// The configured Sort plugin. Fails if none is configured.
pub fn new_sort_plugin(
    registry: &PluginsRegistry<SchedulerServices>,
    services: &SchedulerServices,
) -> RuntimeResult<Arc<dyn SortPlugin>> {
    let entry = services
        .config
        .plugins
        .sort
        .as_ref()
        .ok_or(RuntimeError::MissingPlugin(SORT_STAGE))?;
    let mut setup = PluginSetup::new(registry, services, &services.config.plugins_config);
    Ok(setup.typed(&entry.name, SORT_STAGE, |p| p.as_sort())?)
}

/// The configured SampleNodes plugin. Fails if none is configured.
pub fn new_sample_nodes_plugin(
    registry: &PluginsRegistry<SchedulerServices>,
    services: &SchedulerServices,
) -> RuntimeResult<Arc<dyn SampleNodesPlugin>> {
    let entry = services
        .config
        .plugins
        .sample_nodes
        .as_ref()
        .ok_or(RuntimeError::MissingPlugin(SAMPLE_NODES_STAGE))?;
    let mut setup = PluginSetup::new(registry, services, &services.config.plugins_config);
    Ok(setup.typed(&entry.name, SAMPLE_NODES_STAGE, |p| p.as_sample_nodes())?)
}

/// Plugins of one decision pipeline instance.
pub fn new_decision_pipeline_plugins(
    registry: &PluginsRegistry<SchedulerServices>,
    services: &SchedulerServices,
) -> RuntimeResult<DecisionPipelinePlugins> {
    let list = &services.config.plugins;
    let mut setup = PluginSetup::new(registry, services, &services.config.plugins_config);
    Ok(DecisionPipelinePlugins {
        pre_filter: setup.stage(&list.pre_filter, PRE_FILTER_STAGE, |p| p.as_pre_filter())?,
        filter: setup.stage(&list.filter, FILTER_STAGE, |p| p.as_filter())?,
        pre_score: setup.stage(&list.pre_score, PRE_SCORE_STAGE, |p| p.as_pre_score())?,
        score: setup.score_stage(&list.score, SCORE_STAGE)?,
        reserve: setup.stage(&list.reserve, RESERVE_STAGE, |p| p.as_reserve())?,
    })
}

/// The shared sampling strategy singletons, in configuration order.
pub fn new_sampling_strategies(
    registry: &PluginsRegistry<ClusterAgentServices>,
    services: &ClusterAgentServices,
) -> RuntimeResult<Vec<Arc<dyn SamplingStrategyPlugin>>> {
    let list = &services.config.sampling_plugins.sampling_strategies;
    let mut setup = PluginSetup::new(registry, services, &services.config.plugins_config);
    Ok(setup.stage(list, SAMPLING_STRATEGY_STAGE, |p| p.as_sampling_strategy())?)
}

/// Plugins of one sampling pipeline instance, without the strategies.
pub fn new_sampling_pipeline_plugins(
    registry: &PluginsRegistry<ClusterAgentServices>,
    services: &ClusterAgentServices,
) -> RuntimeResult<SamplingPipelinePlugins> {
    let list = &services.config.sampling_plugins;
    let mut setup = PluginSetup::new(registry, services, &services.config.plugins_config);
    Ok(SamplingPipelinePlugins {
        pre_filter: setup.stage(&list.pre_filter, PRE_FILTER_STAGE, |p| p.as_pre_filter())?,
        filter: setup.stage(&list.filter, FILTER_STAGE, |p| p.as_filter())?,
        pre_score: setup.stage(&list.pre_score, PRE_SCORE_STAGE, |p| p.as_pre_score())?,
        score: setup.score_stage(&list.score, SCORE_STAGE)?,
    })
}

/// Plugins of one binding pipeline instance.
pub fn new_binding_pipeline_plugins(
    registry: &PluginsRegistry<ClusterAgentServices>,
    services: &ClusterAgentServices,
) -> RuntimeResult<BindingPipelinePlugins> {
    let list = &services.config.binding_plugins.check_conflicts;
    let mut setup = PluginSetup::new(registry, services, &services.config.plugins_config);
    Ok(BindingPipelinePlugins {
        check_conflicts: setup.stage(list, CHECK_CONFLICTS_STAGE, |p| p.as_check_conflicts())?,
    })
}
