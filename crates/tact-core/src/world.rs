// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tuple world-state store queried during planning.
//!
//! The world state is a map from a case-insensitive string key to a
//! de-duplicated set of same-key fact tuples. It is rebuilt once per tick by
//! its single owner (daemons plus live temporary facts) and is read-only for
//! the duration of the ensuing plan build.
use std::borrow::Cow;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::value::{Tuple, Value};

/// Folds a key to its canonical (ASCII-lowercase) form, borrowing when the
/// key is already canonical.
fn fold_key(key: &str) -> Cow<'_, str> {
    if key.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(key.to_ascii_lowercase())
    } else {
        Cow::Borrowed(key)
    }
}

/// Append-only tuple database keyed by case-insensitive fact name.
///
/// Mutation is append ([`WorldState::add`]) or wholesale ([`WorldState::clear`])
/// only; there is no partial removal. `Clone` is the snapshot constructor.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    facts: FxHashMap<String, FxHashSet<Tuple>>,
}

impl WorldState {
    /// Creates an empty world state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fact tuple under `key`.
    ///
    /// Scalars auto-wrap into 1-tuples via `From<Value> for Tuple`, so
    /// `world.add("position", some_value)` and full tuples both work.
    /// Duplicate tuples under the same key are de-duplicated.
    pub fn add(&mut self, key: &str, fact: impl Into<Tuple>) {
        self.facts
            .entry(fold_key(key).into_owned())
            .or_default()
            .insert(fact.into());
    }

    /// Appends a single scalar value under `key`, wrapped as a 1-tuple.
    pub fn add_value(&mut self, key: &str, value: impl Into<Value>) {
        self.add(key, Tuple::from(value.into()));
    }

    /// Empties every tuple set while preserving the key entries themselves.
    ///
    /// Preserving keys keeps per-key set capacity across ticks, which is the
    /// point of rebuilding in place instead of replacing the map.
    pub fn clear(&mut self) {
        for set in self.facts.values_mut() {
            set.clear();
        }
    }

    /// Returns the tuple set stored under `key`, if any.
    pub(crate) fn tuple_set(&self, key: &str) -> Option<&FxHashSet<Tuple>> {
        self.facts.get(fold_key(key).as_ref())
    }

    /// Iterates the tuples stored under `key`.
    ///
    /// Iteration order is unspecified; callers must not depend on it.
    pub fn facts(&self, key: &str) -> impl Iterator<Item = &Tuple> {
        self.tuple_set(key).into_iter().flatten()
    }

    /// Iterates all known keys (including keys whose sets are empty).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    /// Total number of stored tuples across all keys.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.facts.values().map(FxHashSet::len).sum()
    }
}
