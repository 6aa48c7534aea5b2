// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Variable-binding environments ("scopes").
//!
//! A scope is the set of `?`-prefixed variable bindings visible during one
//! task's precondition evaluation and task-list construction. Scopes fork by
//! value copy: a child created for a nested evaluation never observes later
//! parent mutation, and vice versa.
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// A pooled variable-binding environment.
///
/// Bindings are stored as a flat list scanned linearly; scopes are small
/// (a handful of bindings) and the flat representation clears without
/// releasing capacity, which is what pooling wants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    bindings: Vec<(Arc<str>, Value)>,
}

impl Scope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value bound to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value)
    }

    /// Returns `true` when `name` is bound.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Binds `name` to `value`, replacing any existing binding.
    ///
    /// The query engine only ever binds unbound names; replacement exists
    /// for scope injection, which overwrites by design.
    pub fn set(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self
            .bindings
            .iter_mut()
            .find(|(key, _)| key.as_ref() == name.as_ref())
        {
            slot.1 = value;
        } else {
            self.bindings.push((name, value));
        }
    }

    /// Removes every binding, keeping allocated capacity.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Replaces this scope's contents with a value copy of `other`.
    pub(crate) fn copy_from(&mut self, other: &Self) {
        self.bindings.clear();
        self.bindings.extend(other.bindings.iter().cloned());
    }

    /// Captures the bindings for diagnostics (error enrichment).
    pub(crate) fn capture(&self) -> Box<[(Arc<str>, Value)]> {
        self.bindings.clone().into_boxed_slice()
    }

    /// Iterates the bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings
            .iter()
            .map(|(name, value)| (name.as_ref(), value))
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` when no variable is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_existing_binding() {
        let mut scope = Scope::new();
        scope.set("?x", 1);
        scope.set("?x", 2);

        assert_eq!(scope.len(), 1);
        assert_eq!(scope.get("?x"), Some(&Value::Int(2)));
    }

    #[test]
    fn copy_from_is_a_value_copy() {
        let mut parent = Scope::new();
        parent.set("?x", "alpha");

        let mut child = Scope::new();
        child.copy_from(&parent);
        parent.set("?x", "beta");
        child.set("?y", 1);

        assert_eq!(child.get("?x"), Some(&Value::from("alpha")));
        assert!(!parent.has("?y"));
    }
}
