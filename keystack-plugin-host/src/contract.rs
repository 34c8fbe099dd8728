//! Plugin self-description and the export directory.
//!
//! Every plugin describes itself with a small key set rooted at
//! `system/elektra/modules/<name>`: `infos/placements`, `infos/version`,
//! `infos/description` and one `exports/<function>` key per published
//! function. The callable side of each export lives in an [`ExportTable`],
//! typed by [`Export`] so callers match on the call shape instead of
//! trusting a name.

use crate::io::IoBinding;
use crate::plugin::PluginHandle;
use crate::variable::VariableSlot;
use keystack_types::{Key, KeyName, KeySet, Namespace, RegistrationId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{mpsc, Arc};
use tracing::debug;

/// Export names used between the store and notification plugins.
pub mod names {
    pub const REGISTER_VARIABLE: &str = "registerVariable";
    pub const REGISTER_CALLBACK: &str = "registerCallback";
    pub const UNREGISTER: &str = "unregister";
    pub const MATCHES_CHANGE: &str = "matchesChange";
    pub const OPEN_NOTIFICATION: &str = "openNotification";
    pub const CLOSE_NOTIFICATION: &str = "closeNotification";
    pub const SET_IO_BINDING: &str = "setIoBinding";
}

/// Callback invoked with the key whose value changed.
pub type ChangeCallback = Box<dyn FnMut(&Key) + Send>;

/// Sending side of a store's external change queue.
///
/// Transports push the names of keys changed elsewhere; the store drains
/// the queue on its own thread.
#[derive(Debug, Clone)]
pub struct ChangeSink(mpsc::Sender<KeyName>);

impl ChangeSink {
    pub fn channel() -> (Self, mpsc::Receiver<KeyName>) {
        let (tx, rx) = mpsc::channel();
        (Self(tx), rx)
    }

    /// Queues a changed key name. Returns false once the store is gone.
    pub fn notify(&self, changed: KeyName) -> bool {
        self.0.send(changed).is_ok()
    }
}

/// A published function, tagged by call shape.
#[derive(Clone)]
pub enum Export {
    RegisterVariable(Arc<dyn Fn(KeyName, VariableSlot) -> RegistrationId + Send + Sync>),
    RegisterCallback(Arc<dyn Fn(KeyName, ChangeCallback) -> RegistrationId + Send + Sync>),
    Unregister(Arc<dyn Fn(RegistrationId) -> bool + Send + Sync>),
    /// Whether a change at the given name concerns any registration.
    ChangeFilter(Arc<dyn Fn(&KeyName) -> bool + Send + Sync>),
    OpenNotification(Arc<dyn Fn(ChangeSink) + Send + Sync>),
    CloseNotification(Arc<dyn Fn() + Send + Sync>),
    SetIoBinding(Arc<dyn Fn(Arc<dyn IoBinding>) + Send + Sync>),
}

impl Export {
    /// Short description of the call shape, stored as the export key value.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterVariable(_) => "register-variable",
            Self::RegisterCallback(_) => "register-callback",
            Self::Unregister(_) => "unregister",
            Self::ChangeFilter(_) => "change-filter",
            Self::OpenNotification(_) => "open-notification",
            Self::CloseNotification(_) => "close-notification",
            Self::SetIoBinding(_) => "set-io-binding",
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Export").field(&self.kind()).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    entries: BTreeMap<String, Export>,
}

impl ExportTable {
    pub fn insert(&mut self, name: impl Into<String>, export: Export) -> Option<Export> {
        self.entries.insert(name.into(), export)
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A plugin's answer to "describe yourself".
#[derive(Debug, Clone)]
pub struct Contract {
    name: String,
    keys: KeySet,
    exports: ExportTable,
}

impl Contract {
    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            placements: None,
            version: None,
            description: None,
            exports: ExportTable::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `system/elektra/modules/<name>`
    pub fn root(&self) -> KeyName {
        module_root(&self.name)
    }

    /// Value of `infos/<field>`.
    pub fn info(&self, field: &str) -> Option<&str> {
        let name = self.root().join("infos").join(field);
        self.keys.lookup(&name).and_then(Key::string)
    }

    pub fn placements(&self) -> Option<&str> {
        self.info("placements")
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    pub fn export(&self, function: &str) -> Option<&Export> {
        self.exports.get(function)
    }
}

pub struct ContractBuilder {
    name: String,
    placements: Option<String>,
    version: Option<String>,
    description: Option<String>,
    exports: ExportTable,
}

impl ContractBuilder {
    pub fn placements(mut self, placements: impl Into<String>) -> Self {
        self.placements = Some(placements.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.insert(name, export);
        self
    }

    pub fn build(self) -> Contract {
        let root = module_root(&self.name);
        let infos = root.join("infos");
        let mut keys = KeySet::new();
        keys.append(Key::new(root.clone()));
        keys.append(Key::new(infos.clone()));

        let fields = [
            ("placements", self.placements),
            ("version", self.version),
            ("description", self.description),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                keys.append(Key::with_string(infos.join(field), value));
            }
        }

        let exports_dir = root.join("exports");
        keys.append(Key::new(exports_dir.clone()));
        for name in self.exports.names() {
            if let Some(export) = self.exports.get(name) {
                let mut key_name = exports_dir.clone();
                key_name.add_base_name(name);
                keys.append(Key::with_string(key_name, export.kind()));
            }
        }

        Contract {
            name: self.name,
            keys,
            exports: self.exports,
        }
    }
}

fn module_root(name: &str) -> KeyName {
    let mut root = KeyName::root(Namespace::System).join("elektra/modules");
    root.add_base_name(name);
    root
}

/// Resolves an export published by `plugin`.
///
/// A missing export is an expected outcome; not every plugin publishes
/// every optional function.
pub fn lookup(plugin: &PluginHandle, function: &str) -> Option<Export> {
    let export = plugin.contract().export(function).cloned();
    if export.is_none() {
        debug!(plugin = %plugin.name(), function, "export not found");
    }
    export
}

/// An export call recorded for plugins that are not loaded yet.
///
/// Multiplexers keep these and run them against every plugin they take on
/// later. Plugins without the export are skipped.
#[derive(Clone)]
pub struct DeferredCall {
    function: String,
    apply: Arc<dyn Fn(&Export) + Send + Sync>,
}

impl DeferredCall {
    pub fn new(function: impl Into<String>, apply: impl Fn(&Export) + Send + Sync + 'static) -> Self {
        Self {
            function: function.into(),
            apply: Arc::new(apply),
        }
    }

    /// `setIoBinding(binding)`
    pub fn set_io_binding(binding: Arc<dyn IoBinding>) -> Self {
        Self::new(names::SET_IO_BINDING, move |export: &Export| {
            if let Export::SetIoBinding(set) = export {
                set(Arc::clone(&binding));
            }
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Runs the call if `plugin` exports the function. Returns whether it ran.
    pub fn execute(&self, plugin: &PluginHandle) -> bool {
        match plugin.contract().export(&self.function) {
            Some(export) => {
                (self.apply)(export);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeferredCall").field(&self.function).finish()
    }
}
