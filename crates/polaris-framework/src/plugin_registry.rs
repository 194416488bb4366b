//! Name to factory registry and the plugin instantiation helper.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::debug;

use crate::config::{PluginConfig, PluginListEntry, PluginsConfigEntry, find_plugin_config};
use crate::plugin::{Plugin, ScorePlugin, WeightedScorePlugin};

/// Creates a plugin from its optional config block and the owner's services.
pub type PluginFactoryFn<O> =
    Arc<dyn Fn(Option<&PluginConfig>, &O) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Maps plugin names to factories. `O` is the owner's services type.
pub struct PluginsRegistry<O> {
    factories: HashMap<String, PluginFactoryFn<O>>,
}

impl<O> Default for PluginsRegistry<O> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<O> Clone for PluginsRegistry<O> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<O> PluginsRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any earlier factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Option<&PluginConfig>, &O) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&PluginFactoryFn<O>> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Instantiates the plugins of one pipeline.
///
/// A plugin listed in several stages is created once and shared between
/// them. Each stage list is checked for the matching capability when it is
/// set up.
pub struct PluginSetup<'a, O> {
    registry: &'a PluginsRegistry<O>,
    owner: &'a O,
    plugins_config: &'a [PluginsConfigEntry],
    instances: HashMap<String, Arc<dyn Plugin>>,
}

impl<'a, O> PluginSetup<'a, O> {
    pub fn new(
        registry: &'a PluginsRegistry<O>,
        owner: &'a O,
        plugins_config: &'a [PluginsConfigEntry],
    ) -> Self {
        Self {
            registry,
            owner,
            plugins_config,
            instances: HashMap::new(),
        }
    }

    /// The instance for `name`, created on first use.
    pub fn instance(&mut self, name: &str) -> anyhow::Result<Arc<dyn Plugin>> {
        if let Some(existing) = self.instances.get(name) {
            return Ok(existing.clone());
        }
        let factory = self
            .registry
            .get(name)
            .ok_or_else(|| anyhow!("no plugin factory found for plugin name {name}"))?;
        let config = find_plugin_config(self.plugins_config, name);
        let plugin = factory(config, self.owner)
            .with_context(|| format!("error creating plugin {name}"))?;
        debug!(plugin = %name, "plugin instantiated");
        self.instances.insert(name.to_string(), plugin.clone());
        Ok(plugin)
    }

    /// Create a single plugin and cast it to the stage trait `T`.
    pub fn typed<T: ?Sized>(
        &mut self,
        name: &str,
        stage: &str,
        cast: fn(Arc<dyn Plugin>) -> Option<Arc<T>>,
    ) -> anyhow::Result<Arc<T>> {
        let plugin = self.instance(name)?;
        cast(plugin).ok_or_else(|| anyhow!("plugin {name} does not implement the {stage} interface"))
    }

    /// Set up all plugins of a stage list, in list order.
    pub fn stage<T: ?Sized>(
        &mut self,
        list: &[PluginListEntry],
        stage: &str,
        cast: fn(Arc<dyn Plugin>) -> Option<Arc<T>>,
    ) -> anyhow::Result<Vec<Arc<T>>> {
        list.iter()
            .map(|entry| self.typed(&entry.name, stage, cast))
            .collect()
    }

    /// Set up score plugins together with their configured weights.
    pub fn score_stage(
        &mut self,
        list: &[PluginListEntry],
        stage: &str,
    ) -> anyhow::Result<Vec<WeightedScorePlugin>> {
        list.iter()
            .map(|entry| {
                let plugin: Arc<dyn ScorePlugin> =
                    self.typed(&entry.name, stage, |p| p.as_score())?;
                Ok(WeightedScorePlugin {
                    plugin,
                    weight: entry.effective_weight(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SchedulingContext;
    use crate::model::{NodeInfo, PodInfo};
    use crate::plugin::{FilterPlugin, PreFilterPlugin, StageResult};
    use crate::status::{FILTER_STAGE, PRE_FILTER_STAGE, SCORE_STAGE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Owner {
        created: AtomicUsize,
    }

    struct FitLike;

    impl Plugin for FitLike {
        fn name(&self) -> &str {
            "FitLike"
        }

        fn as_pre_filter(self: Arc<Self>) -> Option<Arc<dyn PreFilterPlugin>> {
            Some(self)
        }

        fn as_filter(self: Arc<Self>) -> Option<Arc<dyn FilterPlugin>> {
            Some(self)
        }
    }

    impl PreFilterPlugin for FitLike {
        fn pre_filter(&self, _: &SchedulingContext, _: &PodInfo) -> StageResult {
            Ok(())
        }
    }

    impl FilterPlugin for FitLike {
        fn filter(&self, _: &SchedulingContext, _: &PodInfo, _: &NodeInfo) -> StageResult {
            Ok(())
        }
    }

    fn registry() -> PluginsRegistry<Owner> {
        let mut registry = PluginsRegistry::new();
        registry.register("FitLike", |_config, owner: &Owner| {
            owner.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FitLike) as Arc<dyn Plugin>)
        });
        registry.register("Broken", |_config, _owner: &Owner| anyhow::bail!("bad config"));
        registry
    }

    #[test]
    fn shares_one_instance_across_stages() {
        let registry = registry();
        let owner = Owner {
            created: AtomicUsize::new(0),
        };
        let mut setup = PluginSetup::new(&registry, &owner, &[]);

        let list = [PluginListEntry::new("FitLike")];
        let pre_filter = setup.stage(&list, PRE_FILTER_STAGE, |p| p.as_pre_filter()).unwrap();
        let filter = setup.stage(&list, FILTER_STAGE, |p| p.as_filter()).unwrap();

        assert_eq!(pre_filter.len(), 1);
        assert_eq!(filter[0].name(), "FitLike");
        assert_eq!(owner.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_missing_capability() {
        let registry = registry();
        let owner = Owner {
            created: AtomicUsize::new(0),
        };
        let mut setup = PluginSetup::new(&registry, &owner, &[]);

        let err = setup
            .score_stage(&[PluginListEntry::new("FitLike")], SCORE_STAGE)
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "plugin FitLike does not implement the Score interface"
        );
    }

    #[test]
    fn reports_unknown_and_failing_plugins() {
        let registry = registry();
        let owner = Owner {
            created: AtomicUsize::new(0),
        };
        let mut setup = PluginSetup::new(&registry, &owner, &[]);

        let unknown = setup.instance("Nope").err().unwrap();
        assert!(unknown.to_string().contains("no plugin factory found"));

        let broken = setup.instance("Broken").err().unwrap();
        assert_eq!(broken.to_string(), "error creating plugin Broken");
        assert_eq!(broken.root_cause().to_string(), "bad config");
    }

    #[test]
    fn registry_lists_sorted_names() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["Broken", "FitLike"]);
        assert!(registry.contains("FitLike"));
    }
}
