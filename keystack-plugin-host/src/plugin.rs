//! The plugin trait and shared plugin handles.

use crate::contract::Contract;
use crate::error::PluginError;
use crate::list::Multiplexer;
use crate::placement::Placement;
use keystack_types::{KeyName, KeySet, PluginId};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A backend module that can occupy pipeline placements.
///
/// Entry points receive the placement being run so a plugin mounted at
/// several stages can tell them apart. Every entry point defaults to a
/// successful no-op.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// Self-description: placements, version and exports.
    fn contract(&self) -> Contract;

    fn open(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn get(
        &mut self,
        _returned: &mut KeySet,
        _parent: &KeyName,
        _placement: Placement,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    fn set(
        &mut self,
        _returned: &mut KeySet,
        _parent: &KeyName,
        _placement: Placement,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    fn error(
        &mut self,
        _returned: &mut KeySet,
        _parent: &KeyName,
        _placement: Placement,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Multiplexing adapters return themselves here.
    fn as_multiplexer(&mut self) -> Option<&mut dyn Multiplexer> {
        None
    }
}

/// Shared reference to a loaded plugin instance.
///
/// Identity is the [`PluginId`] assigned at load time, so two loads of the
/// same module stay distinct. The contract is captured once at load.
#[derive(Clone)]
pub struct PluginHandle {
    id: PluginId,
    name: Arc<str>,
    contract: Arc<Contract>,
    inner: Arc<Mutex<Box<dyn Plugin>>>,
}

impl PluginHandle {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            id: PluginId::new(),
            name: Arc::from(plugin.name()),
            contract: Arc::new(plugin.contract()),
            inner: Arc::new(Mutex::new(plugin)),
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Locks the plugin for a call. A poisoned lock is recovered; plugin
    /// state stays whatever the panicking call left behind.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Plugin>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_multiplexer(&self) -> bool {
        self.lock().as_multiplexer().is_some()
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
