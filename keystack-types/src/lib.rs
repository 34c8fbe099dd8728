//! Configuration tree types for keystack.
//!
//! This crate defines the tree the plugin pipeline operates on:
//! - Hierarchical key names, rooted or cascading ([`KeyName`], [`Namespace`])
//! - Keys holding a string or binary value ([`Key`], [`Value`])
//! - Ordered key sets with cut and lookup ([`KeySet`])
//! - Plugin instance and registration identifiers
//!
//! Parsing of on-disk formats belongs to storage plugins, not here.

mod array;
mod ids;
mod key;
mod keyset;
mod name;

pub use array::{array_index_name, array_items, next_array_name, parse_array_index};
pub use ids::{PluginId, RegistrationId};
pub use key::{Key, Value};
pub use keyset::KeySet;
pub use name::{KeyName, Namespace};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid key name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("invalid plugin id: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
