//! CLI integration tests for backtest orchestration.
//!
//! Tests cover:
//! - Strategy and backtest config loading from INI files on disk
//! - CSV candle loading with and without a time range
//! - The full backtest command writing JSON output and a trace
//! - Dry-run and validate commands

mod common;

use common::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use tradeloop::adapters::csv_adapter::{CsvCandleSource, write_candles};
use tradeloop::cli;
use tradeloop::domain::error::TradeloopError;
use tradeloop::domain::indicator::IndicatorType;

const STRATEGY_INI: &str = r#"
[strategy]
id = sma_breakout
name = SMA breakout
entry = sma above 105
exit = sma below 100
stop_loss = 50
take_profit = 500
max_position_size = 10

[indicators]
sma = SMA(3)
"#;

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn breakout_closes() -> Vec<f64> {
    let mut closes = vec![100.0; 50];
    closes.extend([110.0, 120.0, 130.0, 90.0, 80.0, 70.0, 70.0]);
    closes
}

/// A temp dir holding `BTCUSDT_1h.csv` and a config pointing at it.
fn setup(extra_backtest: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let candles = candles_from_closes(&breakout_closes());
    let source = CsvCandleSource::new(dir.path());
    write_candles(&source.csv_path("BTCUSDT", "1h"), &candles).unwrap();

    let config = format!(
        "[backtest]\nsymbol = BTCUSDT\ninterval = 1h\ndata_dir = {}\ninitial_balance = 5000\n{}\n{}",
        dir.path().display(),
        extra_backtest,
        STRATEGY_INI
    );
    let config_path = write_file(dir.path(), "backtest.ini", &config);
    (dir, config_path)
}

mod config_loading {
    use super::*;

    #[test]
    fn strategy_loads_from_ini_file() {
        let (_dir, path) = setup("");
        let config = cli::load_config(&path).unwrap();
        let strategy = cli::build_strategy(&config).unwrap();

        assert_eq!(strategy.id, "sma_breakout");
        assert_eq!(strategy.name, "SMA breakout");
        assert_eq!(
            strategy.indicators.get("sma"),
            Some(&IndicatorType::Sma { period: 3 })
        );
        assert_eq!(strategy.entry_conditions.len(), 1);
        assert_eq!(strategy.risk_management.stop_loss_pct, 50.0);
    }

    #[test]
    fn backtest_config_reads_initial_balance() {
        let (_dir, path) = setup("debug_trace = true");
        let config = cli::load_config(&path).unwrap();
        let bt = cli::build_backtest_config(&config);
        assert_eq!(bt.initial_balance, 5000.0);
        assert!(bt.debug_trace);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cli::load_config(&dir.path().join("nope.ini")).is_err());
    }
}

mod candle_loading {
    use super::*;

    #[test]
    fn loads_every_candle_without_a_range() {
        let (_dir, path) = setup("");
        let config = cli::load_config(&path).unwrap();
        let candles = cli::load_backtest_candles(&config, "btcusdt").unwrap();
        assert_eq!(candles.len(), breakout_closes().len());
        assert_eq!(candles[0].open_time, start_time());
    }

    #[test]
    fn range_keeps_candles_opening_inside_it() {
        let (_dir, path) = setup("start = 2024-01-01T10:00:00Z\nend = 2024-01-02T00:00:00Z");
        let config = cli::load_config(&path).unwrap();
        let candles = cli::load_backtest_candles(&config, "BTCUSDT").unwrap();

        assert_eq!(candles.len(), 14);
        assert_eq!(candles[0].open_time, flat_candle(10, 0.0).open_time);
        assert_eq!(candles[13].open_time, flat_candle(23, 0.0).open_time);
    }

    #[test]
    fn missing_csv_is_a_data_error() {
        let (_dir, path) = setup("");
        let config = cli::load_config(&path).unwrap();
        assert!(matches!(
            cli::load_backtest_candles(&config, "ETHUSDT"),
            Err(TradeloopError::DataFetch { .. })
        ));
    }
}

mod commands {
    use super::*;

    #[test]
    fn backtest_writes_result_and_trace() {
        let (dir, path) = setup("");
        let output = dir.path().join("result.json");
        let trace = dir.path().join("trace.jsonl");

        cli::run_backtest(&path, None, Some(&output), Some(&trace), None).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(json["strategy_id"], "sma_breakout");
        assert_eq!(json["initial_balance"], 5000.0);
        let trades = json["trades"].as_array().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0]["entry_price"], 120.0);
        assert_eq!(trades[0]["exit_price"], 70.0);
        assert_eq!(trades[0]["exit_reason"], "signal");

        // SMA(3) warms up over the first two candles.
        let lines = fs::read_to_string(&trace).unwrap();
        assert_eq!(lines.lines().count(), breakout_closes().len() - 2);
        let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(first["index"], 2);
    }

    #[test]
    fn strategy_file_overrides_config_section() {
        let (dir, path) = setup("");
        let strategy = STRATEGY_INI.replace("id = sma_breakout", "id = from_file");
        let strategy_path = write_file(dir.path(), "strategy.ini", &strategy);
        let output = dir.path().join("result.json");

        cli::run_backtest(&path, Some(&strategy_path), Some(&output), None, None).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(json["strategy_id"], "from_file");
    }

    #[test]
    fn too_few_candles_fails_the_backtest() {
        let (_dir, path) = setup("start = 2024-01-01T10:00:00Z");
        assert!(matches!(
            cli::run_backtest(&path, None, None, None, None),
            Err(TradeloopError::InsufficientData { .. })
        ));
    }

    #[test]
    fn dry_run_validates_without_loading_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = format!(
            "[backtest]\nsymbol = BTCUSDT\ninterval = 1h\ndata_dir = {}\n{}",
            dir.path().join("missing").display(),
            STRATEGY_INI
        );
        let path = write_file(dir.path(), "backtest.ini", &config);
        assert!(cli::run_dry_run(&path, None).is_ok());
    }

    #[test]
    fn dry_run_rejects_invalid_backtest_section() {
        let dir = tempfile::tempdir().unwrap();
        let config = format!("[backtest]\nsymbol = BTCUSDT\ninterval = 1h\n{}", STRATEGY_INI);
        let path = write_file(dir.path(), "backtest.ini", &config);
        assert!(matches!(
            cli::run_dry_run(&path, None),
            Err(TradeloopError::ConfigMissing { .. })
        ));
    }

    #[test]
    fn validate_accepts_strategy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "strategy.ini", STRATEGY_INI);
        assert!(cli::run_validate(&path).is_ok());
    }

    #[test]
    fn validate_rejects_bad_condition() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = STRATEGY_INI.replace("sma above 105", "sma sideways 105");
        let path = write_file(dir.path(), "strategy.ini", &strategy);
        assert!(matches!(
            cli::run_validate(&path),
            Err(TradeloopError::RuleParse(_))
        ));
    }
}
