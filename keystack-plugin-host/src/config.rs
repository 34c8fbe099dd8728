//! Store configuration, read from `keystack.toml`.
//!
//! ```toml
//! [mount]
//! atomic = true
//!
//! [global]
//! list = true
//! plugins = ["memory"]
//!
//! [notification]
//! provider = "internalnotification"
//! compare_binary = false
//! ```

use crate::error::ConfigError;
use keystack_types::{Key, KeyName, KeySet, Namespace};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSection {
    /// Undo already bound placements when a later one fails.
    #[serde(default = "default_true")]
    pub atomic: bool,
}

impl Default for MountSection {
    fn default() -> Self {
        Self { atomic: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSection {
    /// Mount the multiplexing adapter when the store opens.
    #[serde(default = "default_true")]
    pub list: bool,
    /// Modules mounted globally when the store opens, in order.
    #[serde(default = "default_global_plugins")]
    pub plugins: Vec<String>,
}

impl Default for GlobalSection {
    fn default() -> Self {
        Self {
            list: true,
            plugins: default_global_plugins(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Compare binary values byte-wise instead of treating every refresh
    /// as a change.
    #[serde(default)]
    pub compare_binary: bool,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            compare_binary: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_global_plugins() -> Vec<String> {
    vec!["memory".to_string()]
}

fn default_provider() -> String {
    "internalnotification".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub mount: MountSection,
    #[serde(default)]
    pub global: GlobalSection,
    #[serde(default)]
    pub notification: NotificationSection,
}

impl StoreConfig {
    /// Loads configuration from `path`. A missing file gives the defaults;
    /// an unreadable or malformed one gives the defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No store config at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::load_file(path) {
            Ok(config) => {
                info!("Loaded store config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Failed to load store config {:?}: {}. Using defaults.", path, e);
                Self::default()
            }
        }
    }

    /// Strict variant of [`StoreConfig::load_from`].
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Configuration handed to the notification provider when it loads.
    pub fn provider_config(&self) -> KeySet {
        let mut config = KeySet::new();
        if self.notification.compare_binary {
            let name = KeyName::root(Namespace::User).join("compare/binary");
            config.append(Key::with_string(name, "1"));
        }
        config
    }
}
