//! Module loader.
//!
//! Maps module names to factories. Loading builds the plugin from its
//! configuration, opens it and wraps it in a [`PluginHandle`]; unloading
//! closes it.

use crate::error::{PluginError, StoreError};
use crate::list::{ListPlugin, LIST_PLUGIN};
use crate::memory::{MemoryBacking, MemoryStorage, MEMORY_PLUGIN};
use crate::plugin::{Plugin, PluginHandle};
use keystack_types::KeySet;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Builds a plugin from its configuration. The registry is passed along so
/// adapters can load the plugins named in their own configuration.
pub type ModuleFactory = Arc<dyn Fn(&KeySet, &ModuleRegistry) -> Box<dyn Plugin> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `list` plus a `memory` module over a fresh backing.
    pub fn with_builtins() -> Self {
        Self::with_memory_backing(MemoryBacking::new())
    }

    /// `list` plus a `memory` module over `backing`.
    pub fn with_memory_backing(backing: MemoryBacking) -> Self {
        let mut modules = Self::new();
        modules.register_with_modules(LIST_PLUGIN, |config, modules| {
            Box::new(ListPlugin::with_modules(config.clone(), modules.clone()))
        });
        modules.register(MEMORY_PLUGIN, move |_| {
            Box::new(MemoryStorage::new(backing.clone()))
        });
        modules
    }

    /// Registers a factory, replacing any previous one with that name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&KeySet) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into(), Arc::new(move |config, _| factory(config)));
    }

    /// Registers a factory that also receives the registry it is loaded from.
    pub fn register_with_modules<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&KeySet, &ModuleRegistry) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn load(&self, name: &str, config: &KeySet) -> Result<PluginHandle, StoreError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StoreError::ModuleNotFound(name.to_string()))?;
        let mut plugin = factory(config, self);
        plugin.open()?;
        let handle = PluginHandle::new(plugin);
        info!(plugin = %name, plugin_id = %handle.id(), "module loaded");
        Ok(handle)
    }

    pub fn unload(handle: &PluginHandle) -> Result<(), PluginError> {
        handle.lock().close()?;
        info!(plugin = %handle.name(), plugin_id = %handle.id(), "module unloaded");
        Ok(())
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
