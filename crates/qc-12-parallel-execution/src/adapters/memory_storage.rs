//! In-memory state storage
//!
//! A block's storage is a fresh layer over the previous block's: reads
//! fall through to the lower layer, writes land in this one. Deleted rows
//! are kept as tombstones so they shadow the lower layer.

use crate::domain::errors::StorageError;
use crate::domain::value_objects::{Entry, TableInfo};
use crate::ports::outbound::StateStorage;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
struct Layer {
    /// Table name to value fields
    tables: BTreeMap<String, String>,
    rows: BTreeMap<String, BTreeMap<String, Entry>>,
}

#[derive(Default)]
pub struct InMemoryStorage {
    layer: RwLock<Layer>,
    prev: Option<Arc<dyn StateStorage>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty layer on top of `prev`.
    pub fn layered(prev: Arc<dyn StateStorage>) -> Self {
        Self {
            layer: RwLock::new(Layer::default()),
            prev: Some(prev),
        }
    }

    pub fn with_table(self, name: &str, value_fields: &str) -> Self {
        self.layer
            .write()
            .tables
            .insert(name.to_string(), value_fields.to_string());
        self
    }

    /// Seed a row, creating its table if needed.
    pub fn with_row(self, table: &str, key: &str, entry: Entry) -> Self {
        {
            let mut layer = self.layer.write();
            layer
                .tables
                .entry(table.to_string())
                .or_insert_with(|| "value".to_string());
            layer
                .rows
                .entry(table.to_string())
                .or_default()
                .insert(key.to_string(), entry);
        }
        self
    }

    fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        if self.layer.read().tables.contains_key(name) {
            return Ok(true);
        }
        match &self.prev {
            Some(prev) => Ok(prev.open_table(name)?.is_some()),
            None => Ok(false),
        }
    }
}

impl StateStorage for InMemoryStorage {
    fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StorageError> {
        let local = self
            .layer
            .read()
            .rows
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned();

        match local {
            Some(entry) if entry.deleted => Ok(None),
            Some(entry) => Ok(Some(entry)),
            None => match &self.prev {
                Some(prev) => prev.get_row(table, key),
                None => Ok(None),
            },
        }
    }

    fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<(), StorageError> {
        if !self.table_exists(table)? {
            return Err(StorageError::TableNotFound(table.to_string()));
        }
        self.layer
            .write()
            .rows
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), entry);
        Ok(())
    }

    fn open_table(&self, name: &str) -> Result<Option<TableInfo>, StorageError> {
        if let Some(value_fields) = self.layer.read().tables.get(name) {
            return Ok(Some(TableInfo {
                name: name.to_string(),
                value_fields: value_fields.clone(),
            }));
        }
        match &self.prev {
            Some(prev) => prev.open_table(name),
            None => Ok(None),
        }
    }

    fn create_table(&self, name: &str, value_fields: &str) -> Result<TableInfo, StorageError> {
        if self.table_exists(name)? {
            return Err(StorageError::TableExists(name.to_string()));
        }
        self.layer
            .write()
            .tables
            .insert(name.to_string(), value_fields.to_string());
        Ok(TableInfo {
            name: name.to_string(),
            value_fields: value_fields.to_string(),
        })
    }

    fn dirty_rows(&self) -> Vec<(String, String, Entry)> {
        let layer = self.layer.read();
        layer
            .rows
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter()
                    .map(move |(key, entry)| (table.clone(), key.clone(), entry.clone()))
            })
            .collect()
    }
}
