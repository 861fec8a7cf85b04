//! Key-lock tracking of one call chain
//!
//! `held_or_seen` is what other chains hold, handed over by the scheduler;
//! `own` is what this chain touched since the last hand-off. Both sets are
//! owned by exactly one unit and only cross chains through export/import.

use std::collections::{BTreeSet, HashSet};

/// System fields never tracked as locks.
pub const EXEMPT_FIELDS: [&str; 3] = ["code", "codeHash", "shard"];

#[derive(Debug, Default)]
pub struct KeyLockTracker {
    held_or_seen: HashSet<String>,
    own: BTreeSet<String>,
}

impl KeyLockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an access to `key`.
    ///
    /// Returns `true` when another chain holds the key and it must be
    /// acquired externally before the access proceeds.
    pub fn before_access(&mut self, key: &str) -> bool {
        let conflict = self.held_or_seen.contains(key) && !self.own.contains(key);
        self.own.insert(key.to_string());
        conflict
    }

    pub fn record(&mut self, key: String) {
        self.own.insert(key);
    }

    /// Replace the set of keys held elsewhere.
    pub fn import_existing_locks<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.held_or_seen = keys.into_iter().collect();
    }

    /// Drain the keys this chain touched, ascending.
    pub fn export_locks(&mut self) -> Vec<String> {
        std::mem::take(&mut self.own).into_iter().collect()
    }

    pub fn is_held_elsewhere(&self, key: &str) -> bool {
        self.held_or_seen.contains(key)
    }

    pub fn owns(&self, key: &str) -> bool {
        self.own.contains(key)
    }

    pub fn is_exempt(field: &str) -> bool {
        EXEMPT_FIELDS.contains(&field)
    }
}
