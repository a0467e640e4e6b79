//! MACD (Moving Average Convergence Divergence).
//!
//! Components:
//! - MACD line = EMA(fast) - EMA(slow)
//! - Signal line = EMA(signal) of the MACD line, seeded with the SMA of its first values
//! - Histogram = MACD line - Signal line
//!
//! Warmup: the first max(fast, slow) + signal - 2 candles have no value.

use crate::domain::indicator::ema::ema_raw;
use crate::domain::indicator::{IndicatorValue, PRICE_DECIMALS, round_to};

pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<IndicatorValue> {
    if fast == 0 || slow == 0 || signal == 0 {
        return Vec::new();
    }

    let longest = fast.max(slow);
    let fast_ema = ema_raw(closes, fast);
    let slow_ema = ema_raw(closes, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return Vec::new();
    }

    // Both EMAs are defined from candle `longest - 1` onwards.
    let line: Vec<f64> = (longest - 1..closes.len())
        .map(|t| fast_ema[t + 1 - fast] - slow_ema[t + 1 - slow])
        .collect();

    let signal_line = ema_raw(&line, signal);

    signal_line
        .iter()
        .enumerate()
        .map(|(j, &sig)| {
            let macd = line[j + signal - 1];
            IndicatorValue::Macd {
                line: round_to(macd, PRICE_DECIMALS),
                signal: round_to(sig, PRICE_DECIMALS),
                histogram: round_to(macd - sig, PRICE_DECIMALS),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_output_length_matches_offset() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let values = calculate_macd(&closes, 12, 26, 9);
        assert_eq!(values.len(), 60 - 33);
    }

    #[test]
    fn macd_minimum_input_yields_one_value() {
        let closes: Vec<f64> = (0..34).map(f64::from).collect();
        assert_eq!(calculate_macd(&closes, 12, 26, 9).len(), 1);
        assert!(calculate_macd(&closes[..33], 12, 26, 9).is_empty());
    }

    #[test]
    fn macd_constant_prices_are_zero() {
        let closes = vec![100.0; 40];
        for v in calculate_macd(&closes, 3, 6, 4) {
            match v {
                IndicatorValue::Macd {
                    line,
                    signal,
                    histogram,
                } => {
                    assert!(line.abs() < f64::EPSILON);
                    assert!(signal.abs() < f64::EPSILON);
                    assert!(histogram.abs() < f64::EPSILON);
                }
                other => panic!("expected MACD value, got {other:?}"),
            }
        }
    }

    #[test]
    fn macd_rising_prices_positive_line() {
        let closes: Vec<f64> = (1..=50).map(f64::from).collect();
        let values = calculate_macd(&closes, 3, 6, 3);
        match values.last() {
            Some(IndicatorValue::Macd { line, .. }) => assert!(*line > 0.0),
            other => panic!("expected MACD value, got {other:?}"),
        }
    }

    #[test]
    fn macd_fast_slower_than_slow_is_allowed() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        // longest = 8, offset = 8 + 3 - 2 = 9
        assert_eq!(calculate_macd(&closes, 8, 4, 3).len(), 21);
    }
}
