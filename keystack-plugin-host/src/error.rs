//! Error types for the plugin host.

use crate::placement::Placement;
use thiserror::Error;

/// A placement name outside the fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown placement '{0}'")]
pub struct UnknownPlacement(pub String);

/// Failure reported by a plugin entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("plugin '{plugin}' failed: {message}")]
pub struct PluginError {
    pub plugin: String,
    pub message: String,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error(transparent)]
    UnknownPlacement(#[from] UnknownPlacement),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("module not found: {0}")]
    ModuleNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    #[error(transparent)]
    UnknownPlacement(#[from] UnknownPlacement),

    #[error("plugin '{0}' declares no placements")]
    MissingPlacements(String),

    #[error("placement {placement} is already occupied by '{occupant}'")]
    SlotConflict {
        placement: Placement,
        occupant: String,
    },

    #[error("plugin '{plugin}' is not mounted at {placement}")]
    NotMounted { plugin: String, placement: Placement },

    #[error("multiplexing adapter failed: {0}")]
    Adapter(#[from] AdapterError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{placement} failed: {source}")]
    Stage {
        placement: Placement,
        source: PluginError,
    },

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notifications are already open")]
    AlreadyOpen,

    #[error("notifications are not open")]
    NotOpen,

    #[error("plugin '{plugin}' does not export '{function}'")]
    LookupFailure {
        plugin: String,
        function: &'static str,
    },

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
