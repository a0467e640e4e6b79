//! Configuration validation.
//!
//! Checks INI sections before anything runs so bad values surface as config
//! errors rather than as failures halfway through a backtest or session.

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::candle::parse_interval;
use crate::domain::error::TradeloopError;
use crate::ports::config_port::ConfigPort;

pub const SOURCE_CSV: &str = "csv";
pub const SOURCE_BINANCE: &str = "binance";

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TradeloopError> {
    require(config, "strategy", "id")?;
    require(config, "strategy", "entry")?;
    require(config, "strategy", "exit")?;
    validate_side(config)?;
    for key in ["stop_loss", "take_profit", "max_position_size"] {
        require(config, "strategy", key)?;
        positive(config, "strategy", key)?;
    }
    if config.get_string("strategy", "risk_per_trade").is_some() {
        positive(config, "strategy", "risk_per_trade")?;
    }
    if config.keys("indicators").is_empty() {
        return Err(TradeloopError::ConfigMissing {
            section: "indicators".to_string(),
            key: "<name>".to_string(),
        });
    }
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TradeloopError> {
    require(config, "backtest", "symbol")?;
    validate_interval(config, "backtest")?;
    if config.get_string("backtest", "initial_balance").is_some() {
        positive(config, "backtest", "initial_balance")?;
    }

    let source = config
        .get_string("backtest", "source")
        .unwrap_or_else(|| SOURCE_CSV.to_string());
    match source.as_str() {
        SOURCE_CSV => {
            require(config, "backtest", "data_dir")?;
        }
        SOURCE_BINANCE => {
            require(config, "backtest", "start")?;
            require(config, "backtest", "end")?;
        }
        other => {
            return Err(invalid(
                "backtest",
                "source",
                format!("unknown source '{}', expected csv or binance", other),
            ));
        }
    }

    let start = optional_time(config, "backtest", "start")?;
    let end = optional_time(config, "backtest", "end")?;
    if let (Some(start), Some(end)) = (start, end)
        && start >= end
    {
        return Err(invalid("backtest", "start", "start must be before end".to_string()));
    }
    Ok(())
}

pub fn validate_live_config(config: &dyn ConfigPort) -> Result<(), TradeloopError> {
    require(config, "live", "symbol")?;
    validate_interval(config, "live")?;
    if config.get_string("live", "initial_balance").is_some() {
        positive(config, "live", "initial_balance")?;
    }

    let window = config.get_int("live", "window_size", 100);
    let min = config.get_int("live", "min_candles", 50);
    if min < 2 {
        return Err(invalid("live", "min_candles", "min_candles must be at least 2".to_string()));
    }
    if window < min {
        return Err(invalid(
            "live",
            "window_size",
            format!("window_size ({}) must be at least min_candles ({})", window, min),
        ));
    }

    for key in [
        "heartbeat_timeout_secs",
        "connect_timeout_secs",
        "message_limit",
        "message_window_ms",
    ] {
        if config.get_string("live", key).is_some() && config.get_int("live", key, 0) < 1 {
            return Err(invalid("live", key, format!("{} must be at least 1", key)));
        }
    }

    let base = config.get_int("live", "reconnect_base_secs", 5);
    let max = config.get_int("live", "reconnect_max_secs", 60);
    if base < 1 || max < base {
        return Err(invalid(
            "live",
            "reconnect_max_secs",
            "reconnect delays must satisfy 1 <= base <= max".to_string(),
        ));
    }
    if config.get_int("live", "max_reconnect_attempts", 10) < 1 {
        return Err(invalid(
            "live",
            "max_reconnect_attempts",
            "max_reconnect_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_time(value: &str, section: &str, key: &str) -> Result<DateTime<Utc>, TradeloopError> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            invalid(
                section,
                key,
                format!("invalid time '{}', expected YYYY-MM-DD or RFC 3339", value),
            )
        })
}

pub fn optional_time(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<DateTime<Utc>>, TradeloopError> {
    config
        .get_string(section, key)
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_time(&s, section, key))
        .transpose()
}

fn validate_interval(config: &dyn ConfigPort, section: &str) -> Result<(), TradeloopError> {
    let interval = require(config, section, "interval")?;
    parse_interval(&interval).map_err(|e| invalid(section, "interval", e.to_string()))?;
    Ok(())
}

fn validate_side(config: &dyn ConfigPort) -> Result<(), TradeloopError> {
    match config.get_string("strategy", "side").as_deref() {
        None | Some("long") | Some("short") => Ok(()),
        Some(other) => Err(invalid(
            "strategy",
            "side",
            format!("side must be long or short, got '{}'", other),
        )),
    }
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, TradeloopError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(TradeloopError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn positive(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TradeloopError> {
    let value = config.get_double(section, key, f64::NAN);
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(section, key, format!("{} must be a positive number", key)))
    }
}

fn invalid(section: &str, key: &str, reason: String) -> TradeloopError {
    TradeloopError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}
