//! Strategy storage port.

use crate::domain::error::TradeloopError;
use crate::domain::strategy::StrategyDefinition;

pub trait StrategyStore: Send + Sync {
    fn get(&self, id: &str) -> Option<StrategyDefinition>;

    /// Insert or replace a strategy. Invalid strategies are rejected with
    /// `InvalidStrategy` and leave the store unchanged.
    fn put(&self, strategy: StrategyDefinition) -> Result<(), TradeloopError>;

    /// Returns `true` when a strategy was removed.
    fn delete(&self, id: &str) -> bool;

    /// All stored strategies, ordered by id.
    fn list(&self) -> Vec<StrategyDefinition>;
}
