//! Candle (kline) representation and validation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::TradeloopError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

impl Candle {
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        self.close_time <= now
    }

    fn fields_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Fails with `InvalidData` when there are fewer than `min_length` candles or
/// any OHLCV field is NaN or infinite.
pub fn validate_candles(candles: &[Candle], min_length: usize) -> Result<(), TradeloopError> {
    if candles.len() < min_length {
        return Err(TradeloopError::InvalidData {
            reason: format!(
                "expected at least {} candles, got {}",
                min_length,
                candles.len()
            ),
        });
    }

    if let Some((i, _)) = candles.iter().enumerate().find(|(_, c)| !c.fields_finite()) {
        return Err(TradeloopError::InvalidData {
            reason: format!("candle {} has a non-numeric OHLCV field", i),
        });
    }

    Ok(())
}

/// Parse an exchange interval such as `1m`, `15m`, `4h`, `1d` or `1w`.
pub fn parse_interval(interval: &str) -> Result<Duration, TradeloopError> {
    let invalid = || TradeloopError::InvalidData {
        reason: format!("unsupported interval '{}'", interval),
    };

    let unit = interval.chars().last().ok_or_else(invalid)?;
    let amount: i64 = interval[..interval.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    match unit {
        's' => Ok(Duration::seconds(amount)),
        'm' => Ok(Duration::minutes(amount)),
        'h' => Ok(Duration::hours(amount)),
        'd' => Ok(Duration::days(amount)),
        'w' => Ok(Duration::weeks(amount)),
        _ => Err(invalid()),
    }
}
