//! The store handle.
//!
//! A [`Store`] owns the placement table (through [`GlobalMounts`]), the
//! plugins mounted globally, and the notification state. Reads run the get
//! stages in order; writes run the set stages and fall back to the rollback
//! stages on failure.
//!
//! Notification flow: application code registers variables and callbacks
//! through the provider's exports. Transports push externally changed key
//! names into the store's [`ChangeSink`]; the application drains them with
//! [`Store::dispatch_pending_changes`], which re-reads the changed subtree
//! when a registration is concerned.
//!
//! Plugins that need an event loop export `setIoBinding`. The store hands
//! its binding to every global plugin and transport, and asks multiplexers
//! to pass it on to plugins they take on later.

use crate::config::StoreConfig;
use crate::contract::{lookup, names, ChangeSink, DeferredCall, Export};
use crate::error::{NotificationError, StoreError};
use crate::io::IoBinding;
use crate::list::LIST_PLUGIN;
use crate::modules::ModuleRegistry;
use crate::mount::GlobalMounts;
use crate::placement::{Phase, Placement};
use crate::plugin::PluginHandle;
use crate::variable::{Variable, Watch};
use keystack_types::{Key, KeyName, KeySet, PluginId, RegistrationId};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Store {
    config: StoreConfig,
    modules: ModuleRegistry,
    mounts: GlobalMounts,
    globals: Vec<PluginHandle>,
    provider: Option<PluginHandle>,
    transports: Vec<PluginHandle>,
    sink: ChangeSink,
    pending: Receiver<KeyName>,
    io_binding: Option<Arc<dyn IoBinding>>,
}

impl Store {
    /// Opens a store and mounts the configured global plugins.
    pub fn open(config: StoreConfig, modules: ModuleRegistry) -> Result<Self, StoreError> {
        let (sink, pending) = ChangeSink::channel();
        let mut store = Self {
            mounts: GlobalMounts::new(config.mount.atomic),
            config,
            modules,
            globals: Vec::new(),
            provider: None,
            transports: Vec::new(),
            sink,
            pending,
            io_binding: None,
        };

        let mut initial = Vec::new();
        if store.config.global.list {
            initial.push(LIST_PLUGIN.to_string());
        }
        initial.extend(store.config.global.plugins.iter().cloned());

        for name in initial {
            if let Err(err) = store.mount_module(&name, &KeySet::new()) {
                if let Err(close_err) = store.close() {
                    warn!(error = %close_err, "cleanup after failed open also failed");
                }
                return Err(err);
            }
        }

        info!(globals = store.globals.len(), "store opened");
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn mounts(&self) -> &GlobalMounts {
        &self.mounts
    }

    /// Globally mounted plugins in mount order.
    pub fn globals(&self) -> &[PluginHandle] {
        &self.globals
    }

    // ================================================================
    // Global plugins
    // ================================================================

    /// Loads `name` and mounts it globally. The plugin is closed again if
    /// mounting fails.
    pub fn mount_module(&mut self, name: &str, config: &KeySet) -> Result<PluginHandle, StoreError> {
        let handle = self.modules.load(name, config)?;
        if let Err(err) = self.mount_global(handle.clone()) {
            if let Err(close_err) = ModuleRegistry::unload(&handle) {
                warn!(plugin = %name, error = %close_err, "close after failed mount failed");
            }
            return Err(err);
        }
        Ok(handle)
    }

    pub fn mount_global(&mut self, plugin: PluginHandle) -> Result<(), StoreError> {
        self.mounts.mount(&plugin)?;
        if let Some(binding) = &self.io_binding {
            self.bind_io(&plugin, binding);
        }
        self.globals.push(plugin);
        Ok(())
    }

    /// Unmounts a global plugin and closes it.
    pub fn unmount_global(&mut self, plugin: PluginId) -> Result<(), StoreError> {
        let Some(position) = self.globals.iter().position(|p| p.id() == plugin) else {
            return Err(StoreError::ModuleNotFound(plugin.to_string()));
        };
        let handle = self.globals.remove(position);
        let unmounted = self.mounts.unmount(&handle);
        ModuleRegistry::unload(&handle)?;
        unmounted?;
        Ok(())
    }

    // ================================================================
    // I/O binding
    // ================================================================

    pub fn io_binding(&self) -> Option<&Arc<dyn IoBinding>> {
        self.io_binding.as_ref()
    }

    /// Hands `binding` to every global plugin, the notification provider and
    /// every transport. Multiplexers keep it for plugins added later, and
    /// plugins mounted or transports attached afterwards receive it too.
    pub fn set_io_binding(&mut self, binding: Arc<dyn IoBinding>) {
        for plugin in &self.globals {
            self.bind_io(plugin, &binding);
        }
        if let Some(provider) = &self.provider {
            DeferredCall::set_io_binding(Arc::clone(&binding)).execute(provider);
        }
        let call = DeferredCall::set_io_binding(Arc::clone(&binding));
        let transports = self
            .transports
            .iter()
            .filter(|transport| call.execute(transport))
            .count();
        info!(globals = self.globals.len(), transports, "io binding set");
        self.io_binding = Some(binding);
    }

    /// A multiplexer records the call for its current and future plugins.
    /// Any other plugin receives the binding if it occupies a slot itself.
    fn bind_io(&self, plugin: &PluginHandle, binding: &Arc<dyn IoBinding>) {
        let call = DeferredCall::set_io_binding(Arc::clone(binding));
        {
            let mut guard = plugin.lock();
            if let Some(multiplexer) = guard.as_multiplexer() {
                multiplexer.defer_call(call);
                return;
            }
        }
        let occupies_slot = self
            .mounts
            .snapshot()
            .iter()
            .any(|(_, id)| *id == plugin.id());
        if occupies_slot && call.execute(plugin) {
            debug!(plugin = %plugin.name(), "io binding handed to plugin");
        }
    }

    // ================================================================
    // Pipeline
    // ================================================================

    /// Runs the get stages, appending what the plugins load below `parent`.
    pub fn get(&mut self, returned: &mut KeySet, parent: &KeyName) -> Result<(), StoreError> {
        for &placement in Phase::Get.stages() {
            let Some(occupant) = self.mounts.occupant(placement) else {
                continue;
            };
            occupant
                .lock()
                .get(returned, parent, placement)
                .map_err(|source| StoreError::Stage { placement, source })?;
        }
        debug!(parent = %parent, keys = returned.len(), "get finished");
        Ok(())
    }

    /// Runs the set stages. A failure up to and including `commit` runs the
    /// rollback stages and then reports the original failure.
    pub fn set(&mut self, returned: &mut KeySet, parent: &KeyName) -> Result<(), StoreError> {
        for &placement in Phase::Set.stages() {
            let Some(occupant) = self.mounts.occupant(placement) else {
                continue;
            };
            let result = occupant.lock().set(returned, parent, placement);
            if let Err(source) = result {
                if placement < Placement::PostCommit {
                    warn!(%placement, error = %source, "set failed, rolling back");
                    self.rollback(returned, parent);
                } else {
                    warn!(%placement, error = %source, "set failed after commit");
                }
                return Err(StoreError::Stage { placement, source });
            }
        }
        debug!(parent = %parent, keys = returned.len(), "set finished");
        Ok(())
    }

    fn rollback(&self, returned: &mut KeySet, parent: &KeyName) {
        for &placement in Phase::Error.stages() {
            let Some(occupant) = self.mounts.occupant(placement) else {
                continue;
            };
            if let Err(err) = occupant.lock().error(returned, parent, placement) {
                warn!(%placement, error = %err, "rollback stage failed");
            }
        }
    }

    /// Closes notifications, transports and every global plugin.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.provider.is_some() {
            if let Err(err) = self.close_notifications() {
                warn!(error = %err, "closing notifications failed");
            }
        }
        for transport in self.transports.drain(..) {
            if let Err(err) = ModuleRegistry::unload(&transport) {
                warn!(plugin = %transport.name(), error = %err, "closing transport failed");
            }
        }

        let mut first_failure = None;
        while let Some(handle) = self.globals.pop() {
            if let Err(err) = self.mounts.unmount(&handle) {
                first_failure.get_or_insert(StoreError::from(err));
            }
            if let Err(err) = ModuleRegistry::unload(&handle) {
                first_failure.get_or_insert(StoreError::from(err));
            }
        }
        info!("store closed");
        first_failure.map_or(Ok(()), Err)
    }

    // ================================================================
    // Notifications
    // ================================================================

    pub fn notifications_open(&self) -> bool {
        self.provider.is_some()
    }

    /// Loads and mounts the configured notification provider and opens
    /// every attached transport.
    pub fn open_notifications(&mut self) -> Result<(), NotificationError> {
        if self.provider.is_some() {
            return Err(NotificationError::AlreadyOpen);
        }

        let name = self.config.notification.provider.clone();
        let provider = self.modules.load(&name, &self.config.provider_config())?;
        if let Err(err) = self.mounts.mount(&provider) {
            if let Err(close_err) = ModuleRegistry::unload(&provider) {
                warn!(plugin = %name, error = %close_err, "close after failed mount failed");
            }
            return Err(err.into());
        }

        for transport in &self.transports {
            self.open_transport(transport);
        }
        info!(provider = %name, "notifications opened");
        self.provider = Some(provider);
        Ok(())
    }

    pub fn close_notifications(&mut self) -> Result<(), NotificationError> {
        let provider = self.provider.take().ok_or(NotificationError::NotOpen)?;

        for transport in &self.transports {
            if let Some(Export::CloseNotification(close)) =
                lookup(transport, names::CLOSE_NOTIFICATION)
            {
                close();
            }
        }

        let unmounted = self.mounts.unmount(&provider);
        if let Err(err) = ModuleRegistry::unload(&provider) {
            warn!(plugin = %provider.name(), error = %err, "closing provider failed");
        }
        unmounted?;
        info!(provider = %provider.name(), "notifications closed");
        Ok(())
    }

    /// Hands a transport plugin the store's change sink. The transport is
    /// opened now if notifications are open, otherwise when they open.
    pub fn attach_transport(&mut self, transport: PluginHandle) {
        if let Some(binding) = &self.io_binding {
            DeferredCall::set_io_binding(Arc::clone(binding)).execute(&transport);
        }
        if self.provider.is_some() {
            self.open_transport(&transport);
        }
        debug!(plugin = %transport.name(), "transport attached");
        self.transports.push(transport);
    }

    fn open_transport(&self, transport: &PluginHandle) {
        match lookup(transport, names::OPEN_NOTIFICATION) {
            Some(Export::OpenNotification(open)) => open(self.sink.clone()),
            _ => warn!(plugin = %transport.name(), "transport does not export openNotification"),
        }
    }

    /// Sender side of this store's change queue.
    pub fn change_sink(&self) -> ChangeSink {
        self.sink.clone()
    }

    fn provider(&self) -> Result<&PluginHandle, NotificationError> {
        self.provider.as_ref().ok_or(NotificationError::NotOpen)
    }

    fn provider_export(&self, function: &'static str) -> Result<Export, NotificationError> {
        let provider = self.provider()?;
        lookup(provider, function).ok_or_else(|| NotificationError::LookupFailure {
            plugin: provider.name().to_string(),
            function,
        })
    }

    fn lookup_failure(&self, function: &'static str) -> NotificationError {
        NotificationError::LookupFailure {
            plugin: self
                .provider
                .as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            function,
        }
    }

    /// Binds `variable` to the key at `path`. The variable is updated on
    /// every pass that sees a changed value at that path.
    pub fn register_variable<T: Watch>(
        &self,
        path: &KeyName,
        variable: &Variable<T>,
    ) -> Result<RegistrationId, NotificationError> {
        match self.provider_export(names::REGISTER_VARIABLE)? {
            Export::RegisterVariable(register) => Ok(register(path.clone(), T::slot(variable))),
            _ => Err(self.lookup_failure(names::REGISTER_VARIABLE)),
        }
    }

    /// Binds `callback` to the key at `path`.
    pub fn register_callback<F>(
        &self,
        path: &KeyName,
        callback: F,
    ) -> Result<RegistrationId, NotificationError>
    where
        F: FnMut(&Key) + Send + 'static,
    {
        match self.provider_export(names::REGISTER_CALLBACK)? {
            Export::RegisterCallback(register) => Ok(register(path.clone(), Box::new(callback))),
            _ => Err(self.lookup_failure(names::REGISTER_CALLBACK)),
        }
    }

    /// Removes a registration. Returns whether it existed.
    pub fn unregister(&self, id: RegistrationId) -> Result<bool, NotificationError> {
        match self.provider_export(names::UNREGISTER)? {
            Export::Unregister(unregister) => Ok(unregister(id)),
            _ => Err(self.lookup_failure(names::UNREGISTER)),
        }
    }

    /// Reacts to a key changed outside this store. When any registration is
    /// concerned, re-reads the subtree at `changed` once and returns true.
    pub fn on_external_change(&mut self, changed: &KeyName) -> Result<bool, NotificationError> {
        let Export::ChangeFilter(matches) = self.provider_export(names::MATCHES_CHANGE)? else {
            return Err(self.lookup_failure(names::MATCHES_CHANGE));
        };
        if !matches(changed) {
            debug!(changed = %changed, "external change concerns no registration");
            return Ok(false);
        }

        debug!(changed = %changed, "external change, re-reading");
        let mut returned = KeySet::new();
        self.get(&mut returned, changed)?;
        Ok(true)
    }

    /// Drains the change queue. Returns the number of re-reads triggered.
    pub fn dispatch_pending_changes(&mut self) -> Result<usize, NotificationError> {
        self.provider()?;
        let changed: Vec<KeyName> = self.pending.try_iter().collect();
        let mut rereads = 0;
        for name in changed {
            if self.on_external_change(&name)? {
                rereads += 1;
            }
        }
        Ok(rereads)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.globals.is_empty() && self.provider.is_none() && self.transports.is_empty() {
            return;
        }
        debug!("store dropped while open, closing");
        if let Err(err) = self.close() {
            warn!(error = %err, "closing dropped store failed");
        }
    }
}
