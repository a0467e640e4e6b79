//! Position sizing and protective price levels.
//!
//! Shared by the backtest simulator and the live session so both size and
//! protect entries identically.

use crate::domain::indicator::{PRICE_DECIMALS, round_to};
use crate::domain::position::Side;
use crate::domain::strategy::RiskManagement;

/// Stop-loss price: below entry for longs, above for shorts.
pub fn stop_loss_price(entry_price: f64, side: Side, stop_loss_pct: f64) -> f64 {
    let distance = entry_price * stop_loss_pct / 100.0;
    round_to(entry_price - side.sign() * distance, PRICE_DECIMALS)
}

/// Take-profit price: above entry for longs, below for shorts.
pub fn take_profit_price(entry_price: f64, side: Side, take_profit_pct: f64) -> f64 {
    let distance = entry_price * take_profit_pct / 100.0;
    round_to(entry_price + side.sign() * distance, PRICE_DECIMALS)
}

/// Quantity to enter at `price`.
///
/// `min(balance × risk / |price − stop|, balance × max_position_size_pct / 100 / price)`.
/// A zero stop distance leaves only the position-size cap. A result ≤ 0 means
/// the entry must be skipped.
pub fn position_size(balance: f64, price: f64, stop_loss: f64, risk: &RiskManagement) -> f64 {
    if !price.is_finite() || price <= 0.0 || !balance.is_finite() {
        return 0.0;
    }

    let cap = balance * risk.max_position_size_pct / 100.0 / price;
    let stop_distance = (price - stop_loss).abs();
    if stop_distance == 0.0 {
        return cap;
    }

    let risk_amount = balance * risk.risk_per_trade_pct / 100.0;
    (risk_amount / stop_distance).min(cap)
}
