//! Registry of constant precompiled contracts

use crate::domain::value_objects::Address;
use crate::ports::outbound::Precompiled;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct PrecompiledRegistry {
    handlers: HashMap<Address, Arc<dyn Precompiled>>,
}

impl PrecompiledRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under an address or a name; replaces any earlier one.
    pub fn set_constant_precompiled(
        &mut self,
        address_or_name: impl Into<Address>,
        handler: Arc<dyn Precompiled>,
    ) {
        self.handlers.insert(address_or_name.into(), handler);
    }

    pub fn with(mut self, address_or_name: impl Into<Address>, handler: Arc<dyn Precompiled>) -> Self {
        self.set_constant_precompiled(address_or_name, handler);
        self
    }

    pub fn get(&self, address: &str) -> Option<Arc<dyn Precompiled>> {
        self.handlers.get(address).cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.handlers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExecuteError;
    use crate::domain::value_objects::MessageType;
    use crate::domain::CallContext;
    use crate::executive::HostContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Precompiled for Noop {
        async fn call(
            &self,
            _host: &mut HostContext,
            input: CallContext,
        ) -> Result<CallContext, ExecuteError> {
            Ok(input.response(MessageType::Finished))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = PrecompiledRegistry::new().with("0x1003", Arc::new(Noop));

        assert!(registry.contains("0x1003"));
        assert!(registry.get("0x1003").is_some());
        assert!(registry.get("0x1004").is_none());
        assert!(!registry.get("0x1003").unwrap().is_parallel());
        assert_eq!(registry.len(), 1);
    }
}
