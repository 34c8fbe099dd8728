//! The multiplexing adapter.
//!
//! `list` occupies a placement slot and forwards each pipeline call to an
//! ordered sequence of plugins. The sequence lives in the adapter's own
//! configuration as an array:
//!
//! ```text
//! user/plugins/#0                       = <plugin name>
//! user/plugins/#0/id                    = <plugin id>
//! user/plugins/#0/placements/<phase>    = <placement>
//! user/plugins/#0/config/...            = <plugin configuration>
//! ```
//!
//! The handles themselves are kept in a side table keyed by plugin id.
//! Indices stay dense from `#0`; dispatch runs in ascending index order.
//! Entries written without an `id` name a module: the adapter loads it on
//! open with the entry's `config` subtree moved under `user`, and unloads it
//! again on close.

use crate::contract::{Contract, DeferredCall};
use crate::error::{AdapterError, PluginError, StoreError};
use crate::modules::ModuleRegistry;
use crate::placement::{parse_placements, Phase, Placement};
use crate::plugin::{Plugin, PluginHandle};
use keystack_types::{
    array_index_name, array_items, next_array_name, parse_array_index, Key, KeyName, KeySet,
    Namespace, PluginId,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

pub const LIST_PLUGIN: &str = "list";

/// Placements the adapter occupies unless `user/placements` says otherwise.
pub const DEFAULT_LIST_PLACEMENTS: &str = "prerollback postrollback pregetstorage postgetstorage \
     postgetcleanup presetstorage presetcleanup precommit postcommit";

/// A plugin that fans out to other plugins and accepts new ones at runtime.
pub trait Multiplexer {
    /// Appends `plugin` at the next index, tagged with the phase of
    /// `placement`, and reparses the fan-out list.
    fn add_plugin(&mut self, plugin: PluginHandle, placement: Placement)
        -> Result<(), AdapterError>;

    /// Removes every entry referring to `plugin` and renumbers the rest.
    /// Succeeds without change when nothing matched.
    fn remove_plugin(&mut self, plugin: PluginId) -> Result<(), AdapterError>;

    /// Current entries in index order.
    fn entries(&self) -> Vec<AdapterEntry>;

    /// Runs `call` on every current plugin and keeps it for plugins added
    /// later.
    fn defer_call(&mut self, call: DeferredCall);
}

/// One configured fan-out target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterEntry {
    pub index: usize,
    pub plugin_id: PluginId,
    pub name: String,
    pub phase: Phase,
    pub placement: Placement,
}

pub struct ListPlugin {
    config: KeySet,
    placements: String,
    modules: ModuleRegistry,
    handles: HashMap<PluginId, PluginHandle>,
    /// Plugins the adapter loaded from its configuration and must unload.
    owned: HashSet<PluginId>,
    deferred: Vec<DeferredCall>,
    stages: [Vec<PluginId>; Placement::COUNT],
}

impl ListPlugin {
    /// An adapter that loads configured modules from the builtin registry.
    pub fn new(config: KeySet) -> Self {
        Self::with_modules(config, ModuleRegistry::with_builtins())
    }

    pub fn with_modules(config: KeySet, modules: ModuleRegistry) -> Self {
        let placements = config
            .resolve_str("user/placements")
            .and_then(Key::string)
            .map_or_else(|| DEFAULT_LIST_PLACEMENTS.to_string(), str::to_string);
        Self {
            config,
            placements,
            modules,
            handles: HashMap::new(),
            owned: HashSet::new(),
            deferred: Vec::new(),
            stages: Default::default(),
        }
    }

    /// The adapter's configuration, fan-out array included.
    pub fn config(&self) -> &KeySet {
        &self.config
    }

    /// Plugin ids dispatched at `placement`, in order.
    pub fn targets(&self, placement: Placement) -> &[PluginId] {
        &self.stages[placement.index()]
    }

    // ================================================================
    // Configuration
    // ================================================================

    /// Rebuilds the per-stage dispatch lists from the configuration.
    fn reopen(&mut self) -> Result<(), AdapterError> {
        self.load_configured()?;
        let mut stages: [Vec<PluginId>; Placement::COUNT] = Default::default();
        for entry in self.parse_entries()? {
            stages[entry.placement.index()].push(entry.plugin_id);
        }
        self.stages = stages;
        Ok(())
    }

    fn parse_entries(&self) -> Result<Vec<AdapterEntry>, AdapterError> {
        let root = plugins_root();
        let mut entries = Vec::new();
        for item in array_items(&self.config, &root) {
            let entry = item.name();
            let Some(index) = entry.base_name().and_then(parse_array_index) else {
                continue;
            };
            let Some(plugin_id) = self
                .config
                .lookup(&entry.join("id"))
                .and_then(Key::string)
                .and_then(|id| PluginId::parse(id).ok())
            else {
                warn!(entry = %entry, "list entry without a valid plugin id, skipping");
                continue;
            };
            let name = item.string().unwrap_or_default().to_string();

            for phase in Phase::ALL {
                let tag_name = entry.join("placements").join(phase.tag());
                let Some(list) = self.config.lookup(&tag_name).and_then(Key::string) else {
                    continue;
                };
                for placement in parse_placements(list)? {
                    if placement.phase() != phase {
                        warn!(entry = %entry, %placement, %phase, "placement filed under wrong phase");
                        continue;
                    }
                    entries.push(AdapterEntry {
                        index,
                        plugin_id,
                        name: name.clone(),
                        phase,
                        placement,
                    });
                }
            }
        }
        Ok(entries)
    }

    /// Loads the modules named by entries that carry no plugin id yet.
    fn load_configured(&mut self) -> Result<(), AdapterError> {
        let root = plugins_root();
        let pending: Vec<(KeyName, String)> = array_items(&self.config, &root)
            .iter()
            .filter(|item| !self.config.contains(&item.name().join("id")))
            .filter_map(|item| match item.string() {
                Some(name) if !name.is_empty() => Some((item.name().clone(), name.to_string())),
                _ => {
                    warn!(entry = %item.name(), "list entry names no module, skipping");
                    None
                }
            })
            .collect();

        for (entry, module) in pending {
            let config = self.module_config(&entry);
            let handle = self
                .modules
                .load(&module, &config)
                .map_err(|err| match err {
                    StoreError::ModuleNotFound(name) => AdapterError::ModuleNotFound(name),
                    StoreError::Plugin(err) => AdapterError::Plugin(err),
                    other => AdapterError::Plugin(PluginError::new(&module, other.to_string())),
                })?;

            self.config
                .append(Key::with_string(entry.join("id"), handle.id().to_string()));
            for call in &self.deferred {
                call.execute(&handle);
            }
            debug!(
                plugin = %module,
                entry = %entry,
                plugin_id = %handle.id(),
                "loaded list entry"
            );
            self.owned.insert(handle.id());
            self.handles.insert(handle.id(), handle);
        }
        Ok(())
    }

    /// The entry's `config` subtree with `user` as its root.
    fn module_config(&self, entry: &KeyName) -> KeySet {
        let base = entry.join("config");
        let mut config = KeySet::new();
        for key in self.config.below(&base) {
            let Some(relative) = key.name().relative_to(&base) else {
                continue;
            };
            let mut name = KeyName::root(Namespace::User);
            for segment in relative {
                name.add_base_name(segment);
            }
            config.append(key.renamed(name));
        }
        config
    }

    /// Unloads the plugins this adapter loaded itself and drops their ids,
    /// so the next open loads them again.
    fn unload_owned(&mut self) {
        let root = plugins_root();
        let id_keys: Vec<KeyName> = array_items(&self.config, &root)
            .iter()
            .map(|item| item.name().join("id"))
            .filter(|id_name| {
                self.config
                    .lookup(id_name)
                    .and_then(Key::string)
                    .and_then(|id| PluginId::parse(id).ok())
                    .is_some_and(|id| self.owned.contains(&id))
            })
            .collect();
        for id_name in &id_keys {
            self.config.remove(id_name);
        }

        for id in self.owned.drain() {
            let Some(handle) = self.handles.remove(&id) else {
                continue;
            };
            if let Err(err) = ModuleRegistry::unload(&handle) {
                warn!(
                    plugin = %handle.name(),
                    plugin_id = %id,
                    error = %err,
                    "failed to unload list entry"
                );
            }
        }
    }

    /// Moves the remaining entries to indices `#0..` keeping their order.
    fn renumber(&mut self) {
        let root = plugins_root();
        let old: Vec<KeyName> = array_items(&self.config, &root)
            .iter()
            .map(|key| key.name().clone())
            .collect();

        let mut moved = KeySet::new();
        for (index, old_entry) in old.iter().enumerate() {
            let mut new_entry = root.clone();
            new_entry.add_base_name(&array_index_name(index));
            if &new_entry == old_entry {
                continue;
            }
            for key in self.config.cut(old_entry) {
                let Some(relative) = key.name().relative_to(old_entry) else {
                    continue;
                };
                let mut name = new_entry.clone();
                for segment in relative {
                    name.add_base_name(segment);
                }
                moved.append(key.renamed(name));
            }
        }
        self.config.append_all(moved);
    }

    // ================================================================
    // Dispatch
    // ================================================================

    fn dispatch(
        &self,
        placement: Placement,
        mut call: impl FnMut(&mut dyn Plugin) -> Result<(), PluginError>,
    ) -> Result<(), PluginError> {
        for id in self.targets(placement) {
            let Some(handle) = self.handles.get(id) else {
                warn!(plugin_id = %id, %placement, "list entry has no loaded plugin");
                continue;
            };
            let mut plugin = handle.lock();
            call(&mut **plugin)?;
        }
        Ok(())
    }
}

fn plugins_root() -> KeyName {
    KeyName::root(Namespace::User).join("plugins")
}

impl Multiplexer for ListPlugin {
    fn add_plugin(
        &mut self,
        plugin: PluginHandle,
        placement: Placement,
    ) -> Result<(), AdapterError> {
        let root = plugins_root();
        if !self.config.contains(&root) {
            self.config.append(Key::new(root.clone()));
        }
        let entry = next_array_name(&self.config, &root);
        let phase = placement.phase();

        self.config
            .append(Key::with_string(entry.clone(), plugin.name()));
        self.config
            .append(Key::with_string(entry.join("id"), plugin.id().to_string()));
        self.config.append(Key::with_string(
            entry.join("placements").join(phase.tag()),
            placement.name(),
        ));

        debug!(plugin = %plugin.name(), entry = %entry, %placement, "added to list");
        for call in &self.deferred {
            call.execute(&plugin);
        }
        self.handles.insert(plugin.id(), plugin);
        self.reopen()
    }

    fn remove_plugin(&mut self, plugin: PluginId) -> Result<(), AdapterError> {
        let root = plugins_root();
        let id = plugin.to_string();
        let matching: Vec<KeyName> = array_items(&self.config, &root)
            .iter()
            .map(|key| key.name().clone())
            .filter(|entry| {
                self.config.lookup(&entry.join("id")).and_then(Key::string) == Some(id.as_str())
            })
            .collect();

        if matching.is_empty() {
            debug!(plugin_id = %plugin, "not in list, nothing to remove");
            return Ok(());
        }

        for entry in &matching {
            self.config.cut(entry);
        }
        self.renumber();
        if let Some(handle) = self.handles.remove(&plugin) {
            if self.owned.remove(&plugin) {
                if let Err(err) = ModuleRegistry::unload(&handle) {
                    warn!(plugin_id = %plugin, error = %err, "failed to unload removed list entry");
                }
            }
        }
        debug!(plugin_id = %plugin, removed = matching.len(), "removed from list");
        self.reopen()
    }

    fn entries(&self) -> Vec<AdapterEntry> {
        self.parse_entries().unwrap_or_else(|err| {
            warn!(error = %err, "list configuration holds an unknown placement");
            Vec::new()
        })
    }

    fn defer_call(&mut self, call: DeferredCall) {
        let reached = self
            .handles
            .values()
            .filter(|handle| call.execute(handle))
            .count();
        debug!(function = %call.function(), reached, "deferred call recorded");
        self.deferred.push(call);
    }
}

impl Plugin for ListPlugin {
    fn name(&self) -> &str {
        LIST_PLUGIN
    }

    fn contract(&self) -> Contract {
        Contract::builder(LIST_PLUGIN)
            .placements(self.placements.clone())
            .version(env!("CARGO_PKG_VERSION"))
            .description("Multiplexes several plugins into the placements it occupies")
            .build()
    }

    fn open(&mut self) -> Result<(), PluginError> {
        self.reopen()
            .map_err(|err| PluginError::new(LIST_PLUGIN, err.to_string()))
    }

    fn close(&mut self) -> Result<(), PluginError> {
        self.unload_owned();
        self.handles.clear();
        self.stages = Default::default();
        Ok(())
    }

    fn get(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        self.dispatch(placement, |plugin| plugin.get(returned, parent, placement))
    }

    fn set(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        self.dispatch(placement, |plugin| plugin.set(returned, parent, placement))
    }

    fn error(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        self.dispatch(placement, |plugin| plugin.error(returned, parent, placement))
    }

    fn as_multiplexer(&mut self) -> Option<&mut dyn Multiplexer> {
        Some(self)
    }
}
