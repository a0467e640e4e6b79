//! Trade ledger: balance, open position, closed trades and the equity curve.
//!
//! The ledger is a two-state machine (Flat / Open). A rejected transition
//! returns an error and leaves every field untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::TradeloopError;
use crate::domain::position::{ExitReason, Position, Side, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub time: DateTime<Utc>,
    pub drawdown_pct: f64,
}

#[derive(Debug, Clone)]
pub struct TradeLedger {
    initial_balance: f64,
    balance: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    drawdown_curve: Vec<DrawdownPoint>,
    peak_equity: f64,
}

impl TradeLedger {
    pub fn new(initial_balance: f64, opened_at: DateTime<Utc>) -> Self {
        let mut ledger = Self {
            initial_balance,
            balance: initial_balance,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            peak_equity: initial_balance,
        };
        ledger.record_equity(opened_at, initial_balance);
        ledger
    }

    pub fn enter(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        quantity: f64,
        side: Side,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<(), TradeloopError> {
        if self.position.is_some() {
            return Err(TradeloopError::AlreadyInPosition);
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(TradeloopError::RiskRejected {
                reason: format!("quantity must be positive, got {}", quantity),
            });
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(TradeloopError::RiskRejected {
                reason: format!("entry price must be positive, got {}", price),
            });
        }

        self.position = Some(Position {
            entry_time: time,
            entry_price: price,
            quantity,
            side,
            stop_loss,
            take_profit,
        });
        Ok(())
    }

    pub fn exit(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
    ) -> Result<Trade, TradeloopError> {
        let position = self.position.take().ok_or(TradeloopError::NotInPosition)?;

        let profit = position.unrealized_pnl(price);
        let cost = position.entry_price * position.quantity;
        let profit_percentage = if cost != 0.0 {
            profit / cost * 100.0
        } else {
            0.0
        };

        let trade = Trade {
            entry_time: position.entry_time,
            exit_time: time,
            entry_price: position.entry_price,
            exit_price: price,
            side: position.side,
            quantity: position.quantity,
            profit,
            profit_percentage,
            exit_reason: reason,
        };

        self.balance += profit;
        self.trades.push(trade.clone());
        Ok(trade)
    }

    /// Append an equity point valued at `price` and its drawdown.
    pub fn mark(&mut self, time: DateTime<Utc>, price: f64) {
        let equity = self.equity_at(price);
        self.record_equity(time, equity);
    }

    fn record_equity(&mut self, time: DateTime<Utc>, equity: f64) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown_pct = if self.peak_equity > 0.0 {
            (self.peak_equity - equity) / self.peak_equity * 100.0
        } else {
            0.0
        };
        self.equity_curve.push(EquityPoint { time, equity });
        self.drawdown_curve.push(DrawdownPoint { time, drawdown_pct });
    }

    /// Balance when flat, balance plus unrealized PnL when open.
    pub fn equity_at(&self, price: f64) -> f64 {
        match &self.position {
            Some(position) => self.balance + position.unrealized_pnl(price),
            None => self.balance,
        }
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn in_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn drawdown_curve(&self) -> &[DrawdownPoint] {
        &self.drawdown_curve
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.drawdown_curve
            .iter()
            .map(|p| p.drawdown_pct)
            .fold(0.0, f64::max)
    }
}
