//! Storage access wrapper
//!
//! Every row read or write of a unit passes `before_access` first, which
//! feeds the unit's `KeyLockTracker`. The wrapper itself never suspends:
//! when a key is held elsewhere it returns the lock id and the host performs
//! the external acquisition before touching storage.

use super::key_locks::KeyLockTracker;
use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{Address, Entry, TableInfo};
use crate::ports::outbound::StateStorage;
use std::sync::Arc;

pub struct StorageAccessWrapper {
    storage: Arc<dyn StateStorage>,
    tracker: KeyLockTracker,
    /// Owning contract, set by the sharding factory
    namespace: Option<Address>,
}

impl StorageAccessWrapper {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self {
            storage,
            tracker: KeyLockTracker::new(),
            namespace: None,
        }
    }

    /// Track keys per contract address.
    pub fn with_namespace(mut self, contract: impl Into<Address>) -> Self {
        self.namespace = Some(contract.into());
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Identifier under which `table`/`key` is tracked.
    pub fn lock_id(&self, table: &str, key: &str) -> String {
        match &self.namespace {
            Some(contract) => format!("{contract}/{table}:{key}"),
            None => format!("{table}:{key}"),
        }
    }

    /// Register an access. Returns the lock id when it must be acquired
    /// from the chain currently holding it.
    pub fn before_access(&mut self, table: &str, key: &str) -> Option<String> {
        if KeyLockTracker::is_exempt(key) {
            return None;
        }

        let id = self.lock_id(table, key);
        if self.tracker.before_access(&id) {
            Some(id)
        } else {
            None
        }
    }

    pub fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, ExecuteError> {
        Ok(self.storage.get_row(table, key)?)
    }

    pub fn get_rows(&self, table: &str, keys: &[String]) -> Result<Vec<Option<Entry>>, ExecuteError> {
        Ok(self.storage.get_rows(table, keys)?)
    }

    pub fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<(), ExecuteError> {
        Ok(self.storage.set_row(table, key, entry)?)
    }

    pub fn open_table(&self, name: &str) -> Result<Option<TableInfo>, ExecuteError> {
        Ok(self.storage.open_table(name)?)
    }

    pub fn create_table(&self, name: &str, value_fields: &str) -> Result<TableInfo, ExecuteError> {
        Ok(self.storage.create_table(name, value_fields)?)
    }

    /// Take over a lock acquired on this chain's behalf.
    pub fn record_lock(&mut self, id: String) {
        self.tracker.record(id);
    }

    pub fn import_existing_locks(&mut self, keys: Vec<String>) {
        self.tracker.import_existing_locks(keys);
    }

    pub fn export_locks(&mut self) -> Vec<String> {
        self.tracker.export_locks()
    }

    pub fn tracker(&self) -> &KeyLockTracker {
        &self.tracker
    }
}
