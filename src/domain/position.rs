//! Open position and closed trade records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub side: Side,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.quantity
    }

    /// Long stops trigger on the candle low, short stops on the high.
    pub fn stop_loss_breached(&self, candle: &Candle) -> bool {
        match self.side {
            Side::Long => candle.low <= self.stop_loss,
            Side::Short => candle.high >= self.stop_loss,
        }
    }

    pub fn take_profit_breached(&self, candle: &Candle) -> bool {
        match self.side {
            Side::Long => candle.high >= self.take_profit,
            Side::Short => candle.low <= self.take_profit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    EndOfData,
    SessionStopped,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Signal => "signal",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::SessionStopped => "session_stopped",
        };
        write!(f, "{}", s)
    }
}

/// A closed round trip. Created only when a position goes flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub side: Side,
    pub quantity: f64,
    pub profit: f64,
    pub profit_percentage: f64,
    pub exit_reason: ExitReason,
}
