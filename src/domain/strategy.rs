//! Strategy definition and validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::condition::Condition;
use crate::domain::error::TradeloopError;
use crate::domain::indicator::IndicatorType;
use crate::domain::position::Side;

pub const DEFAULT_RISK_PER_TRADE_PCT: f64 = 1.0;

fn default_risk_per_trade_pct() -> f64 {
    DEFAULT_RISK_PER_TRADE_PCT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskManagement {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_position_size_pct: f64,
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,
}

impl RiskManagement {
    fn validate(&self) -> Result<(), TradeloopError> {
        let check = |name: &str, value: f64, max: f64| {
            if value.is_finite() && value > 0.0 && value <= max {
                Ok(())
            } else {
                Err(TradeloopError::InvalidStrategy {
                    reason: format!("{} must be in (0, {}], got {}", name, max, value),
                })
            }
        };
        check("stop_loss_pct", self.stop_loss_pct, 100.0)?;
        // Long stop must stay above zero.
        if self.stop_loss_pct >= 100.0 {
            return Err(TradeloopError::InvalidStrategy {
                reason: "stop_loss_pct must be below 100".to_string(),
            });
        }
        check("take_profit_pct", self.take_profit_pct, f64::MAX)?;
        check("max_position_size_pct", self.max_position_size_pct, 100.0)?;
        check("risk_per_trade_pct", self.risk_per_trade_pct, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub side: Side,
    pub indicators: BTreeMap<String, IndicatorType>,
    pub entry_conditions: Vec<Condition>,
    pub exit_conditions: Vec<Condition>,
    pub risk_management: RiskManagement,
}

impl StrategyDefinition {
    /// Reject strategies that could never trade or reference unknown indicators.
    pub fn validate(&self) -> Result<(), TradeloopError> {
        let invalid = |reason: String| -> Result<(), TradeloopError> {
            Err(TradeloopError::InvalidStrategy { reason })
        };

        if self.id.trim().is_empty() {
            return invalid("strategy id must not be empty".to_string());
        }
        if self.indicators.is_empty() {
            return invalid("at least one indicator must be declared".to_string());
        }
        if self.entry_conditions.is_empty() {
            return invalid("at least one entry condition is required".to_string());
        }
        if self.exit_conditions.is_empty() {
            return invalid("at least one exit condition is required".to_string());
        }

        for indicator in self.indicators.values() {
            indicator.validate()?;
        }

        for condition in self.entry_conditions.iter().chain(&self.exit_conditions) {
            if let Some(name) = condition
                .referenced_names()
                .find(|name| !self.indicators.contains_key(*name))
            {
                return invalid(format!(
                    "condition '{}' references undeclared indicator '{}'",
                    condition, name
                ));
            }
        }

        self.risk_management.validate()
    }

    /// Largest warm-up offset among declared indicators.
    pub fn max_offset(&self) -> usize {
        self.indicators
            .values()
            .map(IndicatorType::offset)
            .max()
            .unwrap_or(0)
    }

    /// Candles needed before every declared indicator has a value.
    pub fn minimum_candles(&self) -> usize {
        self.max_offset().saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy_parser::parse_conditions;

    fn sample_strategy() -> StrategyDefinition {
        let mut indicators = BTreeMap::new();
        indicators.insert("rsi".to_string(), IndicatorType::Rsi { period: 14 });
        indicators.insert(
            "macd".to_string(),
            IndicatorType::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
        );
        StrategyDefinition {
            id: "rsi-macd".into(),
            name: "RSI + MACD".into(),
            side: Side::Long,
            indicators,
            entry_conditions: parse_conditions("rsi below 30; macd crosses_above macd.signal")
                .unwrap(),
            exit_conditions: parse_conditions("rsi above 70").unwrap(),
            risk_management: RiskManagement {
                stop_loss_pct: 2.0,
                take_profit_pct: 4.0,
                max_position_size_pct: 10.0,
                risk_per_trade_pct: DEFAULT_RISK_PER_TRADE_PCT,
            },
        }
    }

    fn assert_invalid(s: &StrategyDefinition) {
        assert!(matches!(
            s.validate(),
            Err(TradeloopError::InvalidStrategy { .. })
        ));
    }

    #[test]
    fn valid_strategy_passes() {
        assert!(sample_strategy().validate().is_ok());
    }

    #[test]
    fn rejects_missing_indicators() {
        let mut s = sample_strategy();
        s.indicators.clear();
        assert_invalid(&s);
    }

    #[test]
    fn rejects_missing_conditions() {
        let mut s = sample_strategy();
        s.entry_conditions.clear();
        assert_invalid(&s);

        let mut s = sample_strategy();
        s.exit_conditions.clear();
        assert_invalid(&s);
    }

    #[test]
    fn rejects_undeclared_reference() {
        let mut s = sample_strategy();
        s.exit_conditions = parse_conditions("ema above 10").unwrap();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("'ema'"));
    }

    #[test]
    fn rejects_bad_risk_values() {
        let mut s = sample_strategy();
        s.risk_management.stop_loss_pct = 0.0;
        assert_invalid(&s);

        let mut s = sample_strategy();
        s.risk_management.max_position_size_pct = 150.0;
        assert_invalid(&s);

        let mut s = sample_strategy();
        s.risk_management.take_profit_pct = f64::NAN;
        assert_invalid(&s);
    }

    #[test]
    fn rejects_invalid_indicator_params() {
        let mut s = sample_strategy();
        s.indicators
            .insert("rsi".to_string(), IndicatorType::Rsi { period: 0 });
        assert_invalid(&s);
    }

    #[test]
    fn offsets_follow_slowest_indicator() {
        let s = sample_strategy();
        assert_eq!(s.max_offset(), 33);
        assert_eq!(s.minimum_candles(), 34);
    }

    #[test]
    fn json_round_trip_defaults() {
        let json = r#"{
            "id": "s1",
            "indicators": {"rsi": {"type": "rsi", "period": 14}},
            "entry_conditions": [{"indicator": "rsi", "comparison": "below", "target": 30}],
            "exit_conditions": [{"indicator": "rsi", "comparison": "above", "target": 70}],
            "risk_management": {"stop_loss_pct": 2, "take_profit_pct": 4, "max_position_size_pct": 10}
        }"#;
        let s: StrategyDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(s.side, Side::Long);
        assert!((s.risk_management.risk_per_trade_pct - 1.0).abs() < f64::EPSILON);
        assert!(s.validate().is_ok());
    }
}
