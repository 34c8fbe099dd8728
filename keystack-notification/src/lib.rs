//! The `internalnotification` provider.
//!
//! Keeps the registrations made through a store's notification API and
//! checks them on every read and commit pass. Registrations bind a key path
//! either to a typed [`keystack_plugin_host::Variable`] or to a callback.

mod convert;
mod plugin;
mod registry;

pub use convert::{assign, CoercionError};
pub use plugin::{InternalNotification, INTERNAL_NOTIFICATION};
pub use registry::{concerns, Registry};

use keystack_plugin_host::ModuleRegistry;

/// Registers the provider module under [`INTERNAL_NOTIFICATION`].
pub fn install(modules: &mut ModuleRegistry) {
    modules.register(INTERNAL_NOTIFICATION, |config| {
        Box::new(InternalNotification::new(config))
    });
}
