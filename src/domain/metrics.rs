//! Performance metrics over a closed-trade log.

use serde::{Deserialize, Serialize};

use crate::domain::position::Trade;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub net_profit: f64,
    /// Infinite when there are profits and no losses; written as `"inf"`.
    #[serde(with = "unbounded_ratio")]
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Largest fall of cumulative profit from its running peak, in currency units.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

impl Metrics {
    pub fn compute(trades: &[Trade]) -> Self {
        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for trade in trades {
            let profit = trade.profit;
            if profit > 0.0 {
                winning_trades += 1;
                gross_profit += profit;
                largest_win = largest_win.max(profit);
            } else if profit < 0.0 {
                losing_trades += 1;
                gross_loss += profit.abs();
                largest_loss = largest_loss.max(profit.abs());
            }
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let average_win = if winning_trades > 0 {
            gross_profit / winning_trades as f64
        } else {
            0.0
        };

        let average_loss = if losing_trades > 0 {
            gross_loss / losing_trades as f64
        } else {
            0.0
        };

        Metrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            gross_profit,
            gross_loss,
            net_profit: gross_profit - gross_loss,
            profit_factor,
            average_win,
            average_loss,
            largest_win,
            largest_loss,
            max_drawdown: compute_profit_drawdown(trades),
            sharpe_ratio: compute_sharpe(trades),
        }
    }
}

mod unbounded_ratio {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const INFINITE: &str = "inf";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if *value == f64::INFINITY {
            serializer.serialize_str(INFINITE)
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) if text == INFINITE => Ok(f64::INFINITY),
            Raw::Text(text) => Err(D::Error::custom(format!("invalid ratio '{}'", text))),
        }
    }
}

fn compute_profit_drawdown(trades: &[Trade]) -> f64 {
    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;

    for trade in trades {
        cumulative += trade.profit;
        peak = peak.max(cumulative);
        max_dd = max_dd.max(peak - cumulative);
    }

    max_dd
}

/// mean(return %) / stddev(return %) × √252 over per-trade returns.
fn compute_sharpe(trades: &[Trade]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = trades.iter().map(|t| t.profit_percentage).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    if stddev == 0.0 || !stddev.is_finite() {
        return 0.0;
    }

    mean / stddev * TRADING_DAYS_PER_YEAR.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{ExitReason, Side};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn trade(profit: f64, profit_percentage: f64) -> Trade {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            entry_time: time,
            exit_time: time,
            entry_price: 100.0,
            exit_price: 100.0 + profit,
            side: Side::Long,
            quantity: 1.0,
            profit,
            profit_percentage,
            exit_reason: ExitReason::Signal,
        }
    }

    #[test]
    fn empty_trade_log() {
        let m = Metrics::compute(&[]);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn mixed_trades() {
        let trades = vec![trade(100.0, 10.0), trade(-50.0, -5.0), trade(30.0, 3.0)];
        let m = Metrics::compute(&trades);
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 1);
        assert_relative_eq!(m.win_rate, 200.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.gross_profit, 130.0);
        assert_relative_eq!(m.gross_loss, 50.0);
        assert_relative_eq!(m.net_profit, 80.0);
        assert_relative_eq!(m.profit_factor, 2.6);
        assert_relative_eq!(m.average_win, 65.0);
        assert_relative_eq!(m.average_loss, 50.0);
        assert_relative_eq!(m.largest_win, 100.0);
        assert_relative_eq!(m.largest_loss, 50.0);
        assert_relative_eq!(m.max_drawdown, 50.0);
    }

    #[test]
    fn infinite_profit_factor_survives_json() {
        let m = Metrics::compute(&[trade(10.0, 1.0), trade(5.0, 0.5)]);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["profit_factor"], "inf");

        let back: Metrics = serde_json::from_value(json).unwrap();
        assert!(back.profit_factor.is_infinite());
        assert_eq!(back.total_trades, 2);

        let mixed = Metrics::compute(&[trade(30.0, 3.0), trade(-10.0, -1.0)]);
        let json = serde_json::to_value(&mixed).unwrap();
        assert_eq!(json["profit_factor"], 3.0);
        let back: Metrics = serde_json::from_value(json).unwrap();
        assert_eq!(back.profit_factor, 3.0);

        let mut bad = serde_json::to_value(&mixed).unwrap();
        bad["profit_factor"] = serde_json::json!("lots");
        assert!(serde_json::from_value::<Metrics>(bad).is_err());
    }

    #[test]
    fn profit_without_loss_is_infinite_factor() {
        let m = Metrics::compute(&[trade(10.0, 1.0)]);
        assert!(m.profit_factor.is_infinite());
    }

    #[test]
    fn sharpe_known_value() {
        // returns 10, -5, 3: mean 8/3, population stddev sqrt(((22/3)^2 + (23/3)^2 + (1/3)^2) / 3)
        let trades = vec![trade(100.0, 10.0), trade(-50.0, -5.0), trade(30.0, 3.0)];
        let m = Metrics::compute(&trades);
        let mean: f64 = 8.0 / 3.0;
        let var: f64 = ((22.0_f64 / 3.0).powi(2)
            + (23.0_f64 / 3.0).powi(2)
            + (1.0_f64 / 3.0).powi(2))
            / 3.0;
        let expected = mean / var.sqrt() * 252.0_f64.sqrt();
        assert_relative_eq!(m.sharpe_ratio, expected, epsilon = 1e-9);
    }

    #[test]
    fn sharpe_zero_dispersion() {
        let trades = vec![trade(10.0, 1.0), trade(10.0, 1.0)];
        assert_eq!(Metrics::compute(&trades).sharpe_ratio, 0.0);
    }

    #[test]
    fn drawdown_from_running_peak() {
        let trades = vec![
            trade(50.0, 5.0),
            trade(-20.0, -2.0),
            trade(-40.0, -4.0),
            trade(100.0, 10.0),
        ];
        let m = Metrics::compute(&trades);
        assert_relative_eq!(m.max_drawdown, 60.0);
    }
}
