//! Core domain types and logic.

pub mod backtest;
pub mod candle;
pub mod condition;
pub mod condition_eval;
pub mod config_validation;
pub mod decision;
pub mod error;
pub mod execution;
pub mod indicator;
pub mod ledger;
pub mod metrics;
pub mod position;
pub mod strategy;
pub mod strategy_parser;
