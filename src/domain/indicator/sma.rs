//! Simple Moving Average.
//!
//! Arithmetic mean of the last n closes. Warmup: first (n-1) candles have no value.

use crate::domain::indicator::{IndicatorValue, PRICE_DECIMALS, round_to};

/// Unrounded SMA values, one per complete window.
pub(crate) fn sma_raw(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    closes
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<IndicatorValue> {
    sma_raw(closes, period)
        .into_iter()
        .map(|v| IndicatorValue::Simple(round_to(v, PRICE_DECIMALS)))
        .collect()
}
