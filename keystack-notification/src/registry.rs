//! Registration bookkeeping and change detection.

use crate::convert::assign;
use keystack_plugin_host::{ChangeCallback, VariableSlot};
use keystack_types::{Key, KeyName, KeySet, RegistrationId, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

enum Binding {
    Variable(VariableSlot),
    Callback(ChangeCallback),
}

impl Binding {
    fn fire(&mut self, key: &Key) {
        match self {
            Self::Variable(slot) => {
                if let Err(err) = assign(slot, key) {
                    warn!(key = %key.name(), error = %err, "variable left unchanged");
                }
            }
            Self::Callback(callback) => callback(key),
        }
    }
}

struct Registration {
    path: KeyName,
    last: Option<Value>,
    binding: Binding,
}

impl Registration {
    /// Binary values count as changed on every pass unless byte comparison
    /// is enabled. A first observation always counts.
    fn has_changed(&self, value: &Value, compare_binary: bool) -> bool {
        match (value, &self.last) {
            (Value::Binary(new), Some(Value::Binary(old))) if compare_binary => new != old,
            (Value::Binary(_), _) => true,
            (Value::String(new), Some(Value::String(old))) => new != old,
            (Value::String(_), _) => true,
        }
    }
}

/// Ordered registrations keyed by a monotonic id.
///
/// Iteration follows registration order. Callbacks run while the registry
/// is borrowed and must not register or unregister.
pub struct Registry {
    next_id: RegistrationId,
    nodes: BTreeMap<RegistrationId, Registration>,
    compare_binary: bool,
}

impl Registry {
    pub fn new(compare_binary: bool) -> Self {
        Self {
            next_id: RegistrationId::first(),
            nodes: BTreeMap::new(),
            compare_binary,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registered paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &KeyName> {
        self.nodes.values().map(|node| &node.path)
    }

    pub fn register_variable(&mut self, path: KeyName, slot: VariableSlot) -> RegistrationId {
        debug!(path = %path, kind = slot.kind(), "variable registered");
        self.insert(path, Binding::Variable(slot))
    }

    pub fn register_callback(&mut self, path: KeyName, callback: ChangeCallback) -> RegistrationId {
        debug!(path = %path, "callback registered");
        self.insert(path, Binding::Callback(callback))
    }

    fn insert(&mut self, path: KeyName, binding: Binding) -> RegistrationId {
        let id = self.next_id;
        self.next_id = id.next();
        self.nodes.insert(
            id,
            Registration {
                path,
                last: None,
                binding,
            },
        );
        id
    }

    pub fn unregister(&mut self, id: RegistrationId) -> bool {
        self.nodes.remove(&id).is_some()
    }

    /// Compares every registration against `snapshot`, updating cached
    /// values and firing bindings for those that changed. Returns the number
    /// of bindings fired.
    pub fn refresh(&mut self, snapshot: &KeySet) -> usize {
        let compare_binary = self.compare_binary;
        let mut fired = 0;
        for (id, node) in &mut self.nodes {
            let Some(key) = snapshot.resolve(&node.path) else {
                continue;
            };
            if !node.has_changed(key.value(), compare_binary) {
                continue;
            }

            match key.value() {
                // Without binary comparison the cached string stays, so a
                // later equal string is still recognised as unchanged.
                Value::Binary(_) if !compare_binary => {}
                value => node.last = Some(value.clone()),
            }
            debug!(registration = %id, path = %node.path, key = %key.name(), "registration changed");
            node.binding.fire(key);
            fired += 1;
        }
        fired
    }

    /// Whether a change at `changed` concerns any registration.
    pub fn matches_change(&self, changed: &KeyName) -> bool {
        self.nodes.values().any(|node| concerns(&node.path, changed))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("paths", &self.paths().collect::<Vec<_>>())
            .field("compare_binary", &self.compare_binary)
            .finish()
    }
}

/// Whether a change at `changed` concerns a registration at `registered`.
///
/// Matches when `changed` is at or below `registered`, or `registered` is
/// below `changed`. When either name is cascading, the comparison ignores
/// namespaces.
pub fn concerns(registered: &KeyName, changed: &KeyName) -> bool {
    let contained = |registered: &KeyName, changed: &KeyName| {
        changed.is_below_or_same(registered) || registered.is_below(changed)
    };
    if contained(registered, changed) {
        return true;
    }
    (registered.is_cascading() || changed.is_cascading())
        && contained(&registered.to_cascading(), &changed.to_cascading())
}
