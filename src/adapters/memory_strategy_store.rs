//! In-memory strategy store.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

use crate::domain::error::TradeloopError;
use crate::domain::strategy::StrategyDefinition;
use crate::ports::strategy_port::StrategyStore;

#[derive(Debug, Default)]
pub struct MemoryStrategyStore {
    strategies: RwLock<BTreeMap<String, StrategyDefinition>>,
}

impl MemoryStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from strategies, validating each one.
    pub fn with_strategies(
        strategies: impl IntoIterator<Item = StrategyDefinition>,
    ) -> Result<Self, TradeloopError> {
        let store = Self::new();
        for strategy in strategies {
            store.put(strategy)?;
        }
        Ok(store)
    }
}

impl StrategyStore for MemoryStrategyStore {
    fn get(&self, id: &str) -> Option<StrategyDefinition> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn put(&self, strategy: StrategyDefinition) -> Result<(), TradeloopError> {
        strategy.validate()?;
        info!(strategy = %strategy.id, "strategy stored");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(strategy.id.clone(), strategy);
        Ok(())
    }

    fn delete(&self, id: &str) -> bool {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    fn list(&self) -> Vec<StrategyDefinition> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
