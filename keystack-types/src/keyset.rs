//! Ordered key collections.

use crate::{Key, KeyName, Namespace};
use std::collections::BTreeMap;
use std::ops::Bound;

/// An ordered set of keys, unique by name.
///
/// Iteration yields a parent before everything below it, and all keys below
/// a name form one contiguous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: BTreeMap<KeyName, Key>,
}

impl KeySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Inserts a key, returning the key it replaced.
    pub fn append(&mut self, key: Key) -> Option<Key> {
        self.keys.insert(key.name().clone(), key)
    }

    /// Moves every key of `other` into `self`, replacing on name clash.
    pub fn append_all(&mut self, other: KeySet) {
        self.keys.extend(other.keys);
    }

    pub fn contains(&self, name: &KeyName) -> bool {
        self.keys.contains_key(name)
    }

    /// Exact lookup, no cascading resolution.
    pub fn lookup(&self, name: &KeyName) -> Option<&Key> {
        self.keys.get(name)
    }

    pub fn lookup_mut(&mut self, name: &KeyName) -> Option<&mut Key> {
        self.keys.get_mut(name)
    }

    /// Lookup that resolves a cascading name against
    /// [`Namespace::RESOLUTION_ORDER`] before trying the cascading key itself.
    /// Rooted names are looked up exactly.
    pub fn resolve(&self, name: &KeyName) -> Option<&Key> {
        if !name.is_cascading() {
            return self.lookup(name);
        }
        Namespace::RESOLUTION_ORDER
            .iter()
            .find_map(|ns| self.lookup(&name.with_namespace(*ns)))
            .or_else(|| self.lookup(name))
    }

    /// Parses `name` and resolves it. Invalid names resolve to nothing.
    pub fn resolve_str(&self, name: &str) -> Option<&Key> {
        KeyName::parse(name).ok().and_then(|n| self.resolve(&n))
    }

    pub fn remove(&mut self, name: &KeyName) -> Option<Key> {
        self.keys.remove(name)
    }

    /// Removes `root` and every key below it, returning them as a new set.
    pub fn cut(&mut self, root: &KeyName) -> KeySet {
        let names: Vec<KeyName> = self.below(root).map(|k| k.name().clone()).collect();
        let mut cut = KeySet::new();
        for name in names {
            if let Some(key) = self.keys.remove(&name) {
                cut.append(key);
            }
        }
        cut
    }

    /// Keys at or below `root`, in order.
    pub fn below<'a>(&'a self, root: &'a KeyName) -> impl Iterator<Item = &'a Key> + 'a {
        self.keys
            .range((Bound::Included(root), Bound::Unbounded))
            .take_while(move |(name, _)| name.is_below_or_same(root))
            .map(|(_, key)| key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &KeyName> {
        self.keys.keys()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Key) -> bool) {
        self.keys.retain(|_, key| keep(key));
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut ks = KeySet::new();
        ks.extend(iter);
        ks
    }
}

impl Extend<Key> for KeySet {
    fn extend<I: IntoIterator<Item = Key>>(&mut self, iter: I) {
        for key in iter {
            self.append(key);
        }
    }
}

impl IntoIterator for KeySet {
    type Item = Key;
    type IntoIter = std::collections::btree_map::IntoValues<KeyName, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_values()
    }
}
