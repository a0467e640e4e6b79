//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorType`: indicator identity + parameters, with its warm-up offset
//! - `IndicatorValue`: enum for the different indicator output shapes
//! - `IndicatorSeries`: an offset-aligned series of values for one indicator
//! - `IndicatorSet`: every declared indicator of a strategy, keyed by name
//! - `Readings`: a snapshot of all indicator values at one candle index
//!
//! A series never carries placeholder values for its warm-up: value `i`
//! belongs to candle `i + offset`, so `values.len() == candles.len() - offset`.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::candle::Candle;
use crate::domain::error::TradeloopError;

/// Decimal places kept for price-derived outputs.
pub const PRICE_DECIMALS: i32 = 8;
/// Decimal places kept for RSI outputs.
pub const RSI_DECIMALS: i32 = 2;

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

/// Component of an indicator value a condition refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorField {
    /// Scalar value, MACD line, or Bollinger middle band.
    Value,
    MacdSignal,
    MacdHistogram,
    BollingerUpper,
    BollingerLower,
}

impl IndicatorValue {
    pub fn field(&self, field: IndicatorField) -> Option<f64> {
        match (self, field) {
            (IndicatorValue::Simple(v), IndicatorField::Value) => Some(*v),
            (IndicatorValue::Macd { line, .. }, IndicatorField::Value) => Some(*line),
            (IndicatorValue::Macd { signal, .. }, IndicatorField::MacdSignal) => Some(*signal),
            (IndicatorValue::Macd { histogram, .. }, IndicatorField::MacdHistogram) => {
                Some(*histogram)
            }
            (IndicatorValue::Bollinger { middle, .. }, IndicatorField::Value) => Some(*middle),
            (IndicatorValue::Bollinger { upper, .. }, IndicatorField::BollingerUpper) => {
                Some(*upper)
            }
            (IndicatorValue::Bollinger { lower, .. }, IndicatorField::BollingerLower) => {
                Some(*lower)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndicatorType {
    Sma {
        period: usize,
    },
    Ema {
        period: usize,
    },
    Rsi {
        period: usize,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        multiplier: f64,
    },
}

impl IndicatorType {
    /// Number of leading candles with no corresponding output value.
    ///
    /// Saturates for parameters that `validate` rejects.
    pub fn offset(&self) -> usize {
        self.checked_offset().unwrap_or(usize::MAX)
    }

    /// Smallest candle count that yields at least one output value.
    pub fn minimum_required(&self) -> usize {
        self.offset().saturating_add(1)
    }

    fn checked_offset(&self) -> Option<usize> {
        match self {
            IndicatorType::Sma { period } | IndicatorType::Ema { period } => period.checked_sub(1),
            IndicatorType::Rsi { period } => Some(*period),
            IndicatorType::Macd { fast, slow, signal } => {
                (*fast).max(*slow).checked_add(*signal)?.checked_sub(2)
            }
            IndicatorType::Bollinger { period, .. } => period.checked_sub(1),
        }
    }

    pub fn validate(&self) -> Result<(), TradeloopError> {
        let invalid = |reason: String| -> Result<(), TradeloopError> {
            Err(TradeloopError::InvalidStrategy { reason })
        };
        match self {
            IndicatorType::Sma { period }
            | IndicatorType::Ema { period }
            | IndicatorType::Rsi { period }
                if *period == 0 =>
            {
                invalid(format!("{} period must be at least 1", self.name()))
            }
            IndicatorType::Macd { fast, slow, signal }
                if *fast == 0 || *slow == 0 || *signal == 0 =>
            {
                invalid("MACD periods must be at least 1".to_string())
            }
            IndicatorType::Bollinger { period, .. } if *period < 2 => {
                invalid("BOLLINGER period must be at least 2".to_string())
            }
            IndicatorType::Bollinger { multiplier, .. }
                if !multiplier.is_finite() || *multiplier <= 0.0 =>
            {
                invalid("BOLLINGER multiplier must be positive".to_string())
            }
            _ if self.checked_offset().and_then(|o| o.checked_add(1)).is_none() => {
                invalid(format!("{} periods are too large", self.name()))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IndicatorType::Sma { .. } => "SMA",
            IndicatorType::Ema { .. } => "EMA",
            IndicatorType::Rsi { .. } => "RSI",
            IndicatorType::Macd { .. } => "MACD",
            IndicatorType::Bollinger { .. } => "BOLLINGER",
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma { period } => write!(f, "SMA({})", period),
            IndicatorType::Ema { period } => write!(f, "EMA({})", period),
            IndicatorType::Rsi { period } => write!(f, "RSI({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger { period, multiplier } => {
                write!(f, "BOLLINGER({},{})", period, multiplier)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub offset: usize,
    pub values: Vec<IndicatorValue>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value aligned with the candle at `candle_index`, if past the warm-up.
    pub fn value_at(&self, candle_index: usize) -> Option<&IndicatorValue> {
        candle_index
            .checked_sub(self.offset)
            .and_then(|i| self.values.get(i))
    }
}

/// Compute one indicator over a candle sequence.
pub fn calculate(
    candles: &[Candle],
    indicator_type: &IndicatorType,
) -> Result<IndicatorSeries, TradeloopError> {
    indicator_type.validate()?;

    let need = indicator_type.minimum_required();
    if candles.len() < need {
        return Err(TradeloopError::InsufficientData {
            context: indicator_type.to_string(),
            have: candles.len(),
            need,
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let values = match indicator_type {
        IndicatorType::Sma { period } => sma::calculate_sma(&closes, *period),
        IndicatorType::Ema { period } => ema::calculate_ema(&closes, *period),
        IndicatorType::Rsi { period } => rsi::calculate_rsi(&closes, *period),
        IndicatorType::Macd { fast, slow, signal } => {
            macd::calculate_macd(&closes, *fast, *slow, *signal)
        }
        IndicatorType::Bollinger { period, multiplier } => {
            bollinger::calculate_bollinger(&closes, *period, *multiplier)
        }
    };

    Ok(IndicatorSeries {
        indicator_type: indicator_type.clone(),
        offset: indicator_type.offset(),
        values,
    })
}

/// Indicator values of every declared indicator at one candle index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Readings(BTreeMap<String, IndicatorValue>);

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: IndicatorValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndicatorValue)> {
        self.0.iter()
    }
}

/// All declared indicators of a strategy computed over one candle sequence.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    series: BTreeMap<String, IndicatorSeries>,
    candle_count: usize,
}

impl IndicatorSet {
    pub fn compute(
        candles: &[Candle],
        indicators: &BTreeMap<String, IndicatorType>,
    ) -> Result<Self, TradeloopError> {
        let mut series = BTreeMap::new();
        for (name, indicator_type) in indicators {
            series.insert(name.clone(), calculate(candles, indicator_type)?);
        }
        Ok(Self {
            series,
            candle_count: candles.len(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorSeries> {
        self.series.get(name)
    }

    pub fn candle_count(&self) -> usize {
        self.candle_count
    }

    pub fn max_offset(&self) -> usize {
        self.series.values().map(|s| s.offset).max().unwrap_or(0)
    }

    /// Snapshot of every indicator that has a value at `candle_index`.
    pub fn readings_at(&self, candle_index: usize) -> Readings {
        let mut readings = Readings::new();
        for (name, series) in &self.series {
            if let Some(value) = series.value_at(candle_index) {
                readings.insert(name.clone(), *value);
            }
        }
        readings
    }

    /// Readings at the newest candle.
    pub fn latest(&self) -> Readings {
        match self.candle_count.checked_sub(1) {
            Some(i) => self.readings_at(i),
            None => Readings::new(),
        }
    }

    /// Readings at the candle before the newest, if there is one.
    pub fn previous(&self) -> Option<Readings> {
        self.candle_count
            .checked_sub(2)
            .map(|i| self.readings_at(i))
    }
}
