//! Bollinger Bands.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! StdDev is the sample standard deviation (divides by N-1), so n must be at least 2.
//!
//! Warmup: first (n-1) candles have no value.

use crate::domain::indicator::{IndicatorValue, PRICE_DECIMALS, round_to};

pub fn calculate_bollinger(closes: &[f64], period: usize, multiplier: f64) -> Vec<IndicatorValue> {
    if period < 2 || closes.len() < period {
        return Vec::new();
    }

    closes
        .windows(period)
        .map(|window| {
            let middle = window.iter().sum::<f64>() / period as f64;
            let variance = window
                .iter()
                .map(|c| {
                    let diff = c - middle;
                    diff * diff
                })
                .sum::<f64>()
                / (period - 1) as f64;
            let stddev = variance.sqrt();

            IndicatorValue::Bollinger {
                upper: round_to(middle + multiplier * stddev, PRICE_DECIMALS),
                middle: round_to(middle, PRICE_DECIMALS),
                lower: round_to(middle - multiplier * stddev, PRICE_DECIMALS),
            }
        })
        .collect()
}
