use crate::KeyName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value stored in a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    String(String),
    Binary(Vec<u8>),
}

impl Default for Value {
    fn default() -> Self {
        Self::String(String::new())
    }
}

/// A named node of the configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    name: KeyName,
    #[serde(default)]
    value: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    meta: BTreeMap<String, String>,
}

impl Key {
    /// Creates a key with an empty string value.
    #[must_use]
    pub fn new(name: KeyName) -> Self {
        Self {
            name,
            value: Value::default(),
            meta: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_string(name: KeyName, value: impl Into<String>) -> Self {
        Self {
            value: Value::String(value.into()),
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_binary(name: KeyName, value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Value::Binary(value.into()),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &KeyName {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// String value, `None` for binary keys.
    pub fn string(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            Value::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.value, Value::Binary(_))
    }

    pub fn set_string(&mut self, value: impl Into<String>) {
        self.value = Value::String(value.into());
    }

    pub fn set_binary(&mut self, value: impl Into<Vec<u8>>) {
        self.value = Value::Binary(value.into());
    }

    pub fn meta(&self, name: &str) -> Option<&str> {
        self.meta.get(name).map(String::as_str)
    }

    pub fn set_meta(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(name.into(), value.into());
    }

    /// Copy of this key under another name, value and metadata preserved.
    #[must_use]
    pub fn renamed(&self, name: KeyName) -> Key {
        Key {
            name,
            value: self.value.clone(),
            meta: self.meta.clone(),
        }
    }
}
