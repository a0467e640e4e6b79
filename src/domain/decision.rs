//! The per-candle trading decision shared by the backtest and live loops.
//!
//! `decide` is pure: it reads the strategy, the ledger state and the
//! indicator readings and returns an `Action`. `apply` is the only place an
//! action mutates a ledger.

use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info};

use crate::domain::candle::Candle;
use crate::domain::condition::MatchMode;
use crate::domain::condition_eval::evaluate;
use crate::domain::execution::{position_size, stop_loss_price, take_profit_price};
use crate::domain::indicator::Readings;
use crate::domain::ledger::TradeLedger;
use crate::domain::position::{ExitReason, Position, Side, Trade};
use crate::domain::strategy::StrategyDefinition;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Hold,
    Enter {
        side: Side,
        price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    Exit {
        price: f64,
        reason: ExitReason,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Hold => write!(f, "hold"),
            Action::Enter {
                side,
                price,
                quantity,
                ..
            } => write!(f, "enter {} {} @ {}", side, quantity, price),
            Action::Exit { price, reason } => write!(f, "exit {} @ {}", reason, price),
        }
    }
}

/// The slice of session state a decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct DecisionState<'a> {
    pub strategy: &'a StrategyDefinition,
    pub balance: f64,
    pub position: Option<&'a Position>,
}

impl<'a> DecisionState<'a> {
    pub fn new(strategy: &'a StrategyDefinition, ledger: &'a TradeLedger) -> Self {
        Self {
            strategy,
            balance: ledger.balance(),
            position: ledger.position(),
        }
    }
}

pub fn decide(
    state: &DecisionState<'_>,
    current: &Readings,
    previous: Option<&Readings>,
    candle: &Candle,
) -> Action {
    let strategy = state.strategy;

    match state.position {
        None => {
            if !evaluate(
                &strategy.entry_conditions,
                MatchMode::All,
                current,
                previous,
            ) {
                return Action::Hold;
            }

            let risk = &strategy.risk_management;
            let price = candle.close;
            let stop_loss = stop_loss_price(price, strategy.side, risk.stop_loss_pct);
            let take_profit = take_profit_price(price, strategy.side, risk.take_profit_pct);
            let quantity = position_size(state.balance, price, stop_loss, risk);

            if quantity <= 0.0 || !quantity.is_finite() {
                debug!(
                    balance = state.balance,
                    price, quantity, "entry signal skipped: no size"
                );
                return Action::Hold;
            }

            Action::Enter {
                side: strategy.side,
                price,
                quantity,
                stop_loss,
                take_profit,
            }
        }
        Some(position) => {
            if position.stop_loss_breached(candle) {
                Action::Exit {
                    price: position.stop_loss,
                    reason: ExitReason::StopLoss,
                }
            } else if position.take_profit_breached(candle) {
                Action::Exit {
                    price: position.take_profit,
                    reason: ExitReason::TakeProfit,
                }
            } else if evaluate(
                &strategy.exit_conditions,
                MatchMode::Any,
                current,
                previous,
            ) {
                Action::Exit {
                    price: candle.close,
                    reason: ExitReason::Signal,
                }
            } else {
                Action::Hold
            }
        }
    }
}

/// Apply an action to the ledger at the candle's close time.
///
/// A rejected transition is logged and leaves the ledger unchanged.
pub fn apply(ledger: &mut TradeLedger, action: &Action, candle: &Candle) -> Option<Trade> {
    match action {
        Action::Hold => None,
        Action::Enter {
            side,
            price,
            quantity,
            stop_loss,
            take_profit,
        } => {
            match ledger.enter(
                candle.close_time,
                *price,
                *quantity,
                *side,
                *stop_loss,
                *take_profit,
            ) {
                Ok(()) => info!(
                    %side,
                    price, quantity, stop_loss, take_profit, "position opened"
                ),
                Err(e) => error!(error = %e, "ledger rejected entry"),
            }
            None
        }
        Action::Exit { price, reason } => match ledger.exit(candle.close_time, *price, *reason) {
            Ok(trade) => {
                info!(
                    %reason,
                    price,
                    profit = trade.profit,
                    balance = ledger.balance(),
                    "position closed"
                );
                Some(trade)
            }
            Err(e) => {
                error!(error = %e, "ledger rejected exit");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::{IndicatorType, IndicatorValue};
    use crate::domain::strategy::RiskManagement;
    use crate::domain::strategy_parser::parse_conditions;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn strategy() -> StrategyDefinition {
        let mut indicators = BTreeMap::new();
        indicators.insert("rsi".to_string(), IndicatorType::Rsi { period: 14 });
        StrategyDefinition {
            id: "rsi".into(),
            name: String::new(),
            side: Side::Long,
            indicators,
            entry_conditions: parse_conditions("rsi below 30").unwrap(),
            exit_conditions: parse_conditions("rsi above 70").unwrap(),
            risk_management: RiskManagement {
                stop_loss_pct: 2.0,
                take_profit_pct: 4.0,
                max_position_size_pct: 10.0,
                risk_per_trade_pct: 1.0,
            },
        }
    }

    fn candle(low: f64, high: f64, close: f64) -> Candle {
        let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            open_time,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            close_time: open_time + Duration::minutes(1),
        }
    }

    fn rsi(v: f64) -> Readings {
        let mut r = Readings::new();
        r.insert("rsi", IndicatorValue::Simple(v));
        r
    }

    #[test]
    fn flat_entry_signal_enters_at_close() {
        let s = strategy();
        let ledger = TradeLedger::new(10_000.0, Utc::now());
        let state = DecisionState::new(&s, &ledger);
        let action = decide(&state, &rsi(25.0), None, &candle(99.0, 101.0, 100.0));
        assert_eq!(
            action,
            Action::Enter {
                side: Side::Long,
                price: 100.0,
                quantity: 10.0,
                stop_loss: 98.0,
                take_profit: 104.0,
            }
        );
    }

    #[test]
    fn flat_no_signal_holds() {
        let s = strategy();
        let ledger = TradeLedger::new(10_000.0, Utc::now());
        let state = DecisionState::new(&s, &ledger);
        assert_eq!(
            decide(&state, &rsi(50.0), None, &candle(99.0, 101.0, 100.0)),
            Action::Hold
        );
    }

    #[test]
    fn stop_loss_checked_before_take_profit() {
        let s = strategy();
        let mut ledger = TradeLedger::new(10_000.0, Utc::now());
        ledger
            .enter(Utc::now(), 100.0, 10.0, Side::Long, 98.0, 104.0)
            .unwrap();
        let state = DecisionState::new(&s, &ledger);
        let action = decide(&state, &rsi(50.0), None, &candle(97.0, 105.0, 100.0));
        assert_eq!(
            action,
            Action::Exit {
                price: 98.0,
                reason: ExitReason::StopLoss
            }
        );
    }

    #[test]
    fn take_profit_then_signal() {
        let s = strategy();
        let mut ledger = TradeLedger::new(10_000.0, Utc::now());
        ledger
            .enter(Utc::now(), 100.0, 10.0, Side::Long, 98.0, 104.0)
            .unwrap();
        let state = DecisionState::new(&s, &ledger);

        let action = decide(&state, &rsi(50.0), None, &candle(99.0, 104.5, 103.0));
        assert_eq!(
            action,
            Action::Exit {
                price: 104.0,
                reason: ExitReason::TakeProfit
            }
        );

        let action = decide(&state, &rsi(75.0), None, &candle(99.0, 102.0, 101.0));
        assert_eq!(
            action,
            Action::Exit {
                price: 101.0,
                reason: ExitReason::Signal
            }
        );
    }

    #[test]
    fn apply_rejected_action_leaves_ledger_untouched() {
        let mut ledger = TradeLedger::new(10_000.0, Utc::now());
        let c = candle(99.0, 101.0, 100.0);
        let exit = Action::Exit {
            price: 100.0,
            reason: ExitReason::Signal,
        };
        assert!(apply(&mut ledger, &exit, &c).is_none());
        assert!((ledger.balance() - 10_000.0).abs() < f64::EPSILON);
        assert!(ledger.trades().is_empty());
    }

    #[test]
    fn action_display() {
        let action = Action::Exit {
            price: 98.0,
            reason: ExitReason::StopLoss,
        };
        assert_eq!(action.to_string(), "exit stop_loss @ 98");
    }
}
