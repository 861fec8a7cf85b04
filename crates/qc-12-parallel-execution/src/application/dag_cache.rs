//! Speculative DAG preparations
//!
//! Conflict graphs built ahead of a block, keyed by the block identity and
//! the contract they were prepared for. A preparation is only used when the
//! incoming batch is exactly the one it was built from.

use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::Address;
use crate::domain::CallContext;
use crate::flow::DagTask;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DagCacheKey {
    pub number: i64,
    pub timestamp: u64,
    pub contract: Address,
}

impl DagCacheKey {
    pub fn new(number: i64, timestamp: u64, contract: impl Into<Address>) -> Self {
        Self {
            number,
            timestamp,
            contract: contract.into(),
        }
    }
}

pub struct SpeculativeDagCache {
    entries: Mutex<LruCache<DagCacheKey, DagTask>>,
}

impl SpeculativeDagCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn put(&self, key: DagCacheKey, task: DagTask) {
        debug!(
            number = key.number,
            contract = %key.contract,
            inputs = task.len(),
            "Speculative DAG cached"
        );
        self.entries.lock().put(key, task);
    }

    /// Remove and return the preparation for `key` if it was built from
    /// exactly `inputs`. A mismatching entry is dropped.
    ///
    /// `NotPrepared` signals the caller to build the DAG itself.
    pub fn take(&self, key: &DagCacheKey, inputs: &[CallContext]) -> Result<DagTask, ExecuteError> {
        let not_prepared = || ExecuteError::NotPrepared {
            number: key.number,
            contract: key.contract.clone(),
        };

        let task = self.entries.lock().pop(key).ok_or_else(not_prepared)?;
        if task.matches(inputs) {
            debug!(number = key.number, contract = %key.contract, "Speculative DAG hit");
            Ok(task)
        } else {
            info!(
                number = key.number,
                contract = %key.contract,
                "Speculative DAG does not match batch, discarded"
            );
            Err(not_prepared())
        }
    }

    /// Drop preparations for blocks below `number`.
    pub fn purge_below(&self, number: i64) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<DagCacheKey> = entries
            .iter()
            .filter(|(key, _)| key.number < number)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        if !stale.is_empty() {
            debug!(below = number, purged = stale.len(), "Speculative DAGs purged");
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
