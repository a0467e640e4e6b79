//! Exponential Moving Average.
//!
//! Formula: EMA_today = close * k + EMA_yesterday * (1 - k), where k = 2 / (n + 1).
//! The first value is seeded with the SMA of the first n closes.
//!
//! Warmup: first (n-1) candles have no value.

use crate::domain::indicator::{IndicatorValue, PRICE_DECIMALS, round_to};

/// Unrounded EMA values starting at input index `period - 1`.
pub(crate) fn ema_raw(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &value in &values[period..] {
        prev = value * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<IndicatorValue> {
    ema_raw(closes, period)
        .into_iter()
        .map(|v| IndicatorValue::Simple(round_to(v, PRICE_DECIMALS)))
        .collect()
}
