//! Hierarchical key names.
//!
//! A name is a namespace plus a list of path segments. Rooted names are
//! written `user/sw/app` (the `user:/sw/app` spelling is accepted too);
//! cascading names start with a slash (`/sw/app`) and stand for the same
//! path in every namespace.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace of a key name.
///
/// The derived order is the order keys sort in inside a [`crate::KeySet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Cascading,
    Spec,
    Proc,
    Dir,
    User,
    System,
}

impl Namespace {
    /// Namespaces consulted, in order, when a cascading name is resolved.
    pub const RESOLUTION_ORDER: [Namespace; 4] = [
        Namespace::Proc,
        Namespace::Dir,
        Namespace::User,
        Namespace::System,
    ];

    /// Textual prefix used when the name is written out. Empty for cascading.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Cascading => "",
            Self::Spec => "spec",
            Self::Proc => "proc",
            Self::Dir => "dir",
            Self::User => "user",
            Self::System => "system",
        }
    }

    pub fn is_cascading(self) -> bool {
        self == Self::Cascading
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "spec" => Some(Self::Spec),
            "proc" => Some(Self::Proc),
            "dir" => Some(Self::Dir),
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cascading => write!(f, "cascading"),
            other => write!(f, "{}", other.prefix()),
        }
    }
}

/// A parsed, canonical key name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyName {
    namespace: Namespace,
    segments: Vec<String>,
}

impl KeyName {
    /// Parses a key name. Empty segments (`//`) are collapsed.
    pub fn parse(name: &str) -> Result<Self, Error> {
        if name.is_empty() {
            return Err(invalid(name, "name is empty"));
        }

        if let Some(path) = name.strip_prefix('/') {
            return Ok(Self {
                namespace: Namespace::Cascading,
                segments: split_segments(path),
            });
        }

        let (head, path) = match name.split_once('/') {
            Some((head, path)) => (head, path),
            None => (name, ""),
        };
        let prefix = head.strip_suffix(':').unwrap_or(head);
        let namespace =
            Namespace::from_prefix(prefix).ok_or_else(|| invalid(name, "unknown namespace"))?;

        Ok(Self {
            namespace,
            segments: split_segments(path),
        })
    }

    /// The root of a namespace (`user`, `system`, `/`, ...).
    #[must_use]
    pub fn root(namespace: Namespace) -> Self {
        Self {
            namespace,
            segments: Vec::new(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn is_cascading(&self) -> bool {
        self.namespace.is_cascading()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last path segment, `None` for a namespace root.
    pub fn base_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent name, `None` for a namespace root.
    pub fn parent(&self) -> Option<KeyName> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// Appends one segment. The segment is taken literally, slashes included.
    pub fn add_base_name(&mut self, base: &str) {
        self.segments.push(base.to_string());
    }

    /// Replaces the last segment, or appends one on a namespace root.
    pub fn set_base_name(&mut self, base: &str) {
        match self.segments.last_mut() {
            Some(last) => *last = base.to_string(),
            None => self.segments.push(base.to_string()),
        }
    }

    /// Returns a copy with `relative` (split on `/`) appended.
    #[must_use]
    pub fn join(&self, relative: &str) -> KeyName {
        let mut joined = self.clone();
        joined.segments.extend(split_segments(relative));
        joined
    }

    /// Same path in another namespace.
    #[must_use]
    pub fn with_namespace(&self, namespace: Namespace) -> KeyName {
        Self {
            namespace,
            segments: self.segments.clone(),
        }
    }

    /// The namespace-agnostic form of this name.
    #[must_use]
    pub fn to_cascading(&self) -> KeyName {
        self.with_namespace(Namespace::Cascading)
    }

    /// True if `self` lies strictly below `parent` in the same namespace.
    pub fn is_below(&self, parent: &KeyName) -> bool {
        self.namespace == parent.namespace
            && self.segments.len() > parent.segments.len()
            && self.segments.starts_with(&parent.segments)
    }

    pub fn is_below_or_same(&self, parent: &KeyName) -> bool {
        self == parent || self.is_below(parent)
    }

    pub fn is_directly_below(&self, parent: &KeyName) -> bool {
        self.is_below(parent) && self.segments.len() == parent.segments.len() + 1
    }

    /// Scope test used by storage: a cascading `parent` covers the same
    /// path in every namespace, a rooted one only its own namespace.
    pub fn is_in_scope_of(&self, parent: &KeyName) -> bool {
        if parent.is_cascading() {
            self.segments.len() >= parent.segments.len()
                && self.segments.starts_with(&parent.segments)
        } else {
            self.is_below_or_same(parent)
        }
    }

    /// Segments of `self` after `base`, if `self` is at or below `base`.
    pub fn relative_to(&self, base: &KeyName) -> Option<&[String]> {
        self.is_below_or_same(base)
            .then(|| &self.segments[base.segments.len()..])
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(name: &str, reason: &'static str) -> Error {
    Error::InvalidName {
        name: name.to_string(),
        reason,
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cascading() {
            return write!(f, "/{}", self.segments.join("/"));
        }
        f.write_str(self.namespace.prefix())?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for KeyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyName> for String {
    fn from(name: KeyName) -> Self {
        name.to_string()
    }
}
