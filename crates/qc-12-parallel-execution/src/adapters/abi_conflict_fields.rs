//! Declared conflict fields from contract ABI metadata
//!
//! Each contract keeps a JSON ABI in row `abi` of its `/apps/<address>`
//! table. Functions may declare the storage fields they conflict on:
//!
//! ```json
//! [{"name":"transfer","selector":"a9059cbb",
//!   "conflictFields":[{"kind":{"Env":"Caller"},"slot":0},{"kind":{"Var":[0]},"slot":0}]}]
//! ```
//!
//! Lookups are cached per (address, selector).

use crate::algorithms::{extract_critical_keys, ConflictField};
use crate::domain::value_objects::{Address, BlockHeader, Bytes};
use crate::domain::CallContext;
use crate::executive::contract_table;
use crate::ports::outbound::{ConflictFieldProvider, StateStorage};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tracing::{debug, trace};

/// Row of a contract table holding its ABI
pub const ABI_ROW: &str = "abi";

/// One function of a contract ABI, as far as conflict analysis cares
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionAbi {
    pub name: String,
    /// Hex selector, with or without `0x`
    pub selector: String,
    #[serde(default)]
    pub conflict_fields: Vec<ConflictField>,
}

impl FunctionAbi {
    fn selector_bytes(&self) -> Option<[u8; 4]> {
        let raw = self.selector.trim_start_matches("0x");
        hex::decode(raw).ok()?.try_into().ok()
    }
}

pub struct DeclaredConflictFields {
    cache: Mutex<LruCache<(Address, [u8; 4]), Vec<ConflictField>>>,
}

impl DeclaredConflictFields {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    /// Declared fields of `selector` on `address`, read through the cache.
    fn declared_fields(
        &self,
        storage: &dyn StateStorage,
        address: &str,
        selector: [u8; 4],
    ) -> Option<Vec<ConflictField>> {
        let cache_key = (address.to_string(), selector);
        if let Some(fields) = self.cache.lock().get(&cache_key) {
            trace!(%address, selector = %hex::encode(selector), "ABI cache hit");
            return Some(fields.clone());
        }

        let entry = match storage.get_row(&contract_table(address), ABI_ROW) {
            Ok(Some(entry)) if !entry.deleted => entry,
            Ok(_) => return None,
            Err(e) => {
                debug!(%address, error = %e, "ABI lookup failed");
                return None;
            }
        };

        let functions: Vec<FunctionAbi> = match serde_json::from_slice(&entry.value) {
            Ok(functions) => functions,
            Err(e) => {
                debug!(%address, error = %e, "Malformed ABI");
                return None;
            }
        };

        let fields = functions
            .into_iter()
            .find(|f| f.selector_bytes() == Some(selector))?
            .conflict_fields;

        // Functions without declarations are not cached; they stay serial
        if !fields.is_empty() {
            self.cache.lock().put(cache_key, fields.clone());
        }
        Some(fields)
    }
}

impl ConflictFieldProvider for DeclaredConflictFields {
    fn conflict_fields(
        &self,
        storage: &dyn StateStorage,
        header: &BlockHeader,
        input: &CallContext,
    ) -> Option<Vec<Bytes>> {
        let selector = input.selector()?;
        let fields = self.declared_fields(storage, &input.receive_address, selector)?;
        extract_critical_keys(&fields, input, header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStorage;
    use crate::algorithms::{ConflictFieldKind, EnvKind};
    use crate::domain::value_objects::Entry;

    const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

    fn abi_json() -> String {
        let abi = vec![
            FunctionAbi {
                name: "transfer".into(),
                selector: "0xa9059cbb".into(),
                conflict_fields: vec![
                    ConflictField::new(ConflictFieldKind::Env(EnvKind::Caller), Some(0)),
                    ConflictField::new(ConflictFieldKind::Var(vec![0]), Some(0)),
                ],
            },
            FunctionAbi {
                name: "mint".into(),
                selector: "40c10f19".into(),
                conflict_fields: vec![],
            },
        ];
        serde_json::to_string(&abi).unwrap()
    }

    fn storage() -> InMemoryStorage {
        InMemoryStorage::new().with_row(&contract_table("0xtoken"), ABI_ROW, Entry::new(abi_json()))
    }

    fn call(selector: [u8; 4], to_word: u8) -> CallContext {
        let mut data = selector.to_vec();
        let mut word = [0u8; 32];
        word[31] = to_word;
        data.extend_from_slice(&word);
        CallContext::message(1, 0, "0xalice", "0xtoken", data)
    }

    #[test]
    fn test_declared_fields_produce_keys() {
        let provider = DeclaredConflictFields::new(8);
        let storage = storage();
        let header = BlockHeader::new(1, 0);

        let keys = provider
            .conflict_fields(&storage, &header, &call(TRANSFER, 7))
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].ends_with(b"0xalice"));
        assert_eq!(keys[1].last(), Some(&7));
        assert_eq!(provider.cached_entries(), 1);
    }

    #[test]
    fn test_same_parameters_share_keys() {
        let provider = DeclaredConflictFields::new(8);
        let storage = storage();
        let header = BlockHeader::new(1, 0);

        let a = provider.conflict_fields(&storage, &header, &call(TRANSFER, 7));
        let b = provider.conflict_fields(&storage, &header, &call(TRANSFER, 7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_function_is_serial() {
        let provider = DeclaredConflictFields::new(8);
        let storage = storage();
        let header = BlockHeader::new(1, 0);

        // No declarations
        assert!(provider
            .conflict_fields(&storage, &header, &call([0x40, 0xc1, 0x0f, 0x19], 1))
            .is_none());
        // Not in the ABI
        assert!(provider
            .conflict_fields(&storage, &header, &call([1, 2, 3, 4], 1))
            .is_none());
        // No ABI at all
        let other = CallContext::message(1, 0, "0xalice", "0xnone", TRANSFER.to_vec());
        assert!(provider.conflict_fields(&storage, &header, &other).is_none());
        assert_eq!(provider.cached_entries(), 0);
    }

    #[test]
    fn test_malformed_abi_is_serial() {
        let provider = DeclaredConflictFields::new(8);
        let storage =
            InMemoryStorage::new().with_row(&contract_table("0xtoken"), ABI_ROW, Entry::new("{"));
        assert!(provider
            .conflict_fields(&storage, &BlockHeader::new(1, 0), &call(TRANSFER, 7))
            .is_none());
    }

    #[test]
    fn test_zero_capacity_still_caches_one() {
        let provider = DeclaredConflictFields::new(0);
        let storage = storage();
        provider.conflict_fields(&storage, &BlockHeader::new(1, 0), &call(TRANSFER, 7));
        assert_eq!(provider.cached_entries(), 1);
    }
}
