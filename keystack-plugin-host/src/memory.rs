//! In-memory storage plugin.
//!
//! Persists keys in a [`MemoryBacking`] that several stores may share, so a
//! write through one store is visible to the next read through another.

use crate::contract::Contract;
use crate::error::PluginError;
use crate::placement::Placement;
use crate::plugin::Plugin;
use keystack_types::{KeyName, KeySet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const MEMORY_PLUGIN: &str = "memory";

/// Shared persisted key set.
#[derive(Debug, Clone, Default)]
pub struct MemoryBacking(Arc<Mutex<KeySet>>);

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, KeySet> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of everything persisted.
    pub fn snapshot(&self) -> KeySet {
        self.lock().clone()
    }
}

pub struct MemoryStorage {
    backing: MemoryBacking,
    staged: Option<(KeyName, KeySet)>,
}

impl MemoryStorage {
    pub fn new(backing: MemoryBacking) -> Self {
        Self {
            backing,
            staged: None,
        }
    }
}

impl Plugin for MemoryStorage {
    fn name(&self) -> &str {
        MEMORY_PLUGIN
    }

    fn contract(&self) -> Contract {
        Contract::builder(MEMORY_PLUGIN)
            .placements("getstorage setstorage commit rollback")
            .version(env!("CARGO_PKG_VERSION"))
            .description("Keeps keys in process memory")
            .build()
    }

    fn get(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        if placement != Placement::GetStorage {
            return Ok(());
        }
        let backing = self.backing.lock();
        let before = returned.len();
        returned.extend(
            backing
                .iter()
                .filter(|key| key.name().is_in_scope_of(parent))
                .cloned(),
        );
        debug!(parent = %parent, loaded = returned.len() - before, "memory get");
        Ok(())
    }

    fn set(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        match placement {
            Placement::SetStorage => {
                let keys: KeySet = returned
                    .iter()
                    .filter(|key| !key.name().is_cascading() && key.name().is_in_scope_of(parent))
                    .cloned()
                    .collect();
                self.staged = Some((parent.clone(), keys));
            }
            Placement::Commit => {
                if let Some((parent, keys)) = self.staged.take() {
                    let mut backing = self.backing.lock();
                    backing.retain(|key| !key.name().is_in_scope_of(&parent));
                    debug!(parent = %parent, stored = keys.len(), "memory commit");
                    backing.append_all(keys);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn error(
        &mut self,
        _returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        if placement == Placement::Rollback && self.staged.take().is_some() {
            debug!(parent = %parent, "memory rollback discarded staged keys");
        }
        Ok(())
    }
}
