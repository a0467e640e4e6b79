//! tradeloop: indicator-driven strategy backtesting and live paper trading.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], the streaming session layer in
//! [`live`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod live;
pub mod ports;
