//! Backtest simulator.
//!
//! Replays a finite candle sequence through the indicator engine, the
//! condition evaluator and the trade ledger in one deterministic pass.

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::candle::{Candle, validate_candles};
use crate::domain::condition_eval::condition_results;
use crate::domain::decision::{Action, DecisionState, apply, decide};
use crate::domain::error::TradeloopError;
use crate::domain::indicator::{IndicatorSet, Readings};
use crate::domain::ledger::{DrawdownPoint, EquityPoint, TradeLedger};
use crate::domain::metrics::Metrics;
use crate::domain::position::{ExitReason, Trade};
use crate::domain::strategy::StrategyDefinition;

pub const MIN_BACKTEST_CANDLES: usize = 50;
pub const DEFAULT_INITIAL_BALANCE: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_balance: f64,
    pub debug_trace: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            debug_trace: false,
        }
    }
}

/// One candle of the optional debug trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub index: usize,
    pub candle: Candle,
    pub readings: Readings,
    pub entry_results: Vec<bool>,
    pub exit_results: Vec<bool>,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy_id: String,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub max_drawdown_pct: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEntry>,
}

impl BacktestResult {
    pub fn net_profit(&self) -> f64 {
        self.final_balance - self.initial_balance
    }

    pub fn return_pct(&self) -> f64 {
        if self.initial_balance > 0.0 {
            self.net_profit() / self.initial_balance * 100.0
        } else {
            0.0
        }
    }
}

pub fn run_backtest(
    candles: &[Candle],
    strategy: &StrategyDefinition,
    config: &BacktestConfig,
) -> Result<BacktestResult, TradeloopError> {
    strategy.validate()?;

    if candles.len() < MIN_BACKTEST_CANDLES {
        return Err(TradeloopError::InsufficientData {
            context: "backtest".to_string(),
            have: candles.len(),
            need: MIN_BACKTEST_CANDLES,
        });
    }
    validate_candles(candles, MIN_BACKTEST_CANDLES)?;

    let indicators = IndicatorSet::compute(candles, &strategy.indicators)?;
    let start = indicators.max_offset().max(1);
    let last = candles.len() - 1;

    info!(
        strategy = %strategy.id,
        candles = candles.len(),
        warmup = start,
        "starting backtest"
    );

    let mut ledger = TradeLedger::new(config.initial_balance, candles[0].open_time);
    let mut trace = Vec::new();

    let mut previous = indicators.readings_at(start - 1);
    for (i, candle) in candles.iter().enumerate().skip(start) {
        let current = indicators.readings_at(i);

        let mut action = decide(
            &DecisionState::new(strategy, &ledger),
            &current,
            Some(&previous),
            candle,
        );
        // An entry on the final candle would be force-closed at the same price.
        if i == last && matches!(action, Action::Enter { .. }) {
            action = Action::Hold;
        }
        debug!(index = i, close = candle.close, %action, "candle evaluated");

        apply(&mut ledger, &action, candle);

        if i == last && ledger.in_position() {
            let forced = Action::Exit {
                price: candle.close,
                reason: ExitReason::EndOfData,
            };
            apply(&mut ledger, &forced, candle);
        }

        ledger.mark(candle.close_time, candle.close);

        if config.debug_trace {
            trace.push(TraceEntry {
                index: i,
                candle: candle.clone(),
                entry_results: condition_results(
                    &strategy.entry_conditions,
                    &current,
                    Some(&previous),
                ),
                exit_results: condition_results(
                    &strategy.exit_conditions,
                    &current,
                    Some(&previous),
                ),
                readings: current.clone(),
                action,
            });
        }

        previous = current;
    }

    let trades = ledger.trades().to_vec();
    let metrics = Metrics::compute(&trades);

    info!(
        strategy = %strategy.id,
        trades = trades.len(),
        final_balance = ledger.balance(),
        "backtest complete"
    );

    Ok(BacktestResult {
        strategy_id: strategy.id.clone(),
        initial_balance: ledger.initial_balance(),
        final_balance: ledger.balance(),
        trades,
        metrics,
        equity_curve: ledger.equity_curve().to_vec(),
        drawdown_curve: ledger.drawdown_curve().to_vec(),
        max_drawdown_pct: ledger.max_drawdown_pct(),
        trace,
    })
}
