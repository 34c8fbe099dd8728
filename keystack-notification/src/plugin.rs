//! The provider plugin wrapping a [`Registry`].

use crate::registry::Registry;
use keystack_plugin_host::{
    names, ChangeCallback, Contract, Export, Placement, Plugin, PluginError, VariableSlot,
};
use keystack_types::{Key, KeyName, KeySet, RegistrationId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const INTERNAL_NOTIFICATION: &str = "internalnotification";

pub struct InternalNotification {
    registry: Arc<Mutex<Registry>>,
}

impl InternalNotification {
    /// `user/compare/binary = 1` in `config` enables byte comparison of
    /// binary values.
    pub fn new(config: &KeySet) -> Self {
        let compare_binary = config
            .resolve_str("user/compare/binary")
            .and_then(Key::string)
            .is_some_and(|value| value == "1");
        Self {
            registry: Arc::new(Mutex::new(Registry::new(compare_binary))),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    fn refresh(&self, returned: &KeySet, placement: Placement) {
        let fired = self.registry().refresh(returned);
        debug!(%placement, fired, "notification refresh");
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Plugin for InternalNotification {
    fn name(&self) -> &str {
        INTERNAL_NOTIFICATION
    }

    fn contract(&self) -> Contract {
        let variables = Arc::clone(&self.registry);
        let callbacks = Arc::clone(&self.registry);
        let removals = Arc::clone(&self.registry);
        let filter = Arc::clone(&self.registry);

        Contract::builder(INTERNAL_NOTIFICATION)
            .placements("postgetstorage postcommit")
            .version(env!("CARGO_PKG_VERSION"))
            .description("Updates registered variables and callbacks on every read and commit")
            .export(
                names::REGISTER_VARIABLE,
                Export::RegisterVariable(Arc::new(move |path: KeyName, slot: VariableSlot| {
                    lock(&variables).register_variable(path, slot)
                })),
            )
            .export(
                names::REGISTER_CALLBACK,
                Export::RegisterCallback(Arc::new(
                    move |path: KeyName, callback: ChangeCallback| {
                        lock(&callbacks).register_callback(path, callback)
                    },
                )),
            )
            .export(
                names::UNREGISTER,
                Export::Unregister(Arc::new(move |id: RegistrationId| {
                    lock(&removals).unregister(id)
                })),
            )
            .export(
                names::MATCHES_CHANGE,
                Export::ChangeFilter(Arc::new(move |changed: &KeyName| {
                    lock(&filter).matches_change(changed)
                })),
            )
            .build()
    }

    fn get(
        &mut self,
        returned: &mut KeySet,
        _parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        if placement == Placement::PostGetStorage {
            self.refresh(returned, placement);
        }
        Ok(())
    }

    fn set(
        &mut self,
        returned: &mut KeySet,
        _parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        if placement == Placement::PostCommit {
            self.refresh(returned, placement);
        }
        Ok(())
    }
}
