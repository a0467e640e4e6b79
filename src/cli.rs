//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::adapters::csv_adapter::CsvCandleSource;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::candle::Candle;
use crate::domain::config_validation::{
    SOURCE_BINANCE, optional_time, validate_backtest_config, validate_live_config,
    validate_strategy_config,
};
use crate::domain::error::TradeloopError;
use crate::domain::metrics::Metrics;
use crate::domain::position::Side;
use crate::domain::strategy::{DEFAULT_RISK_PER_TRADE_PCT, RiskManagement, StrategyDefinition};
use crate::domain::strategy_parser::{parse_conditions, parse_indicator_type};
use crate::live::backoff::ReconnectPolicy;
use crate::live::session::{SessionConfig, SessionReport};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::HistoricalData;

#[derive(Parser, Debug)]
#[command(name = "tradeloop", about = "Indicator strategy backtester and live paper trader")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over historical candles
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Strategy file; defaults to the [strategy] section of the config
        #[arg(short, long)]
        strategy: Option<PathBuf>,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the per-candle decision trace as JSON lines
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a strategy configuration
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Paper-trade a strategy against the live market stream
    Live {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: Option<PathBuf>,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
        /// Write the session report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            strategy,
            output,
            trace,
            symbol,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, strategy.as_deref())
            } else {
                run_backtest(
                    &config,
                    strategy.as_deref(),
                    output.as_deref(),
                    trace.as_deref(),
                    symbol.as_deref(),
                )
            }
        }
        Command::Validate { strategy } => run_validate(&strategy),
        Command::Live {
            config,
            strategy,
            duration,
            output,
        } => run_live(
            &config,
            strategy.as_deref(),
            duration.map(Duration::from_secs),
            output.as_deref(),
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TradeloopError> {
    FileConfigAdapter::from_file(path)
}

/// Load the strategy from its own file when given, otherwise from the main config.
fn load_strategy(
    main: &FileConfigAdapter,
    strategy_path: Option<&Path>,
) -> Result<StrategyDefinition, TradeloopError> {
    let separate = strategy_path.map(load_config).transpose()?;
    let source: &dyn ConfigPort = match &separate {
        Some(adapter) => adapter,
        None => main,
    };
    validate_strategy_config(source)?;
    build_strategy(source)
}

fn parse_rule_field(
    config: &dyn ConfigPort,
    key: &str,
) -> Result<Vec<crate::domain::condition::Condition>, TradeloopError> {
    let input = config.get_string("strategy", key).unwrap_or_default();
    parse_conditions(&input).map_err(|e| {
        eprintln!(
            "error: failed to parse [strategy] {}:\n{}",
            key,
            e.display_with_context(&input)
        );
        TradeloopError::RuleParse(e)
    })
}

pub fn build_strategy(config: &dyn ConfigPort) -> Result<StrategyDefinition, TradeloopError> {
    let id = config.get_string("strategy", "id").unwrap_or_default();
    let name = config
        .get_string("strategy", "name")
        .unwrap_or_else(|| id.clone());
    let side = match config.get_string("strategy", "side").as_deref() {
        Some("short") => Side::Short,
        _ => Side::Long,
    };

    let mut indicators = BTreeMap::new();
    for key in config.keys("indicators") {
        let declaration = config.get_string("indicators", &key).unwrap_or_default();
        let indicator = parse_indicator_type(&declaration).map_err(|e| {
            eprintln!(
                "error: failed to parse [indicators] {}:\n{}",
                key,
                e.display_with_context(&declaration)
            );
            TradeloopError::RuleParse(e)
        })?;
        indicators.insert(key, indicator);
    }

    let strategy = StrategyDefinition {
        id,
        name,
        side,
        indicators,
        entry_conditions: parse_rule_field(config, "entry")?,
        exit_conditions: parse_rule_field(config, "exit")?,
        risk_management: RiskManagement {
            stop_loss_pct: config.get_double("strategy", "stop_loss", 0.0),
            take_profit_pct: config.get_double("strategy", "take_profit", 0.0),
            max_position_size_pct: config.get_double("strategy", "max_position_size", 0.0),
            risk_per_trade_pct: config.get_double(
                "strategy",
                "risk_per_trade",
                DEFAULT_RISK_PER_TRADE_PCT,
            ),
        },
    };
    strategy.validate()?;
    Ok(strategy)
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> BacktestConfig {
    let defaults = BacktestConfig::default();
    BacktestConfig {
        initial_balance: config.get_double("backtest", "initial_balance", defaults.initial_balance),
        debug_trace: config.get_bool("backtest", "debug_trace", defaults.debug_trace),
    }
}

pub fn build_session_config(config: &dyn ConfigPort) -> Result<SessionConfig, TradeloopError> {
    let symbol = config.get_string("live", "symbol").unwrap_or_default();
    let interval = config.get_string("live", "interval").unwrap_or_default();
    let defaults = SessionConfig::new(symbol, interval);
    let policy = ReconnectPolicy::default();
    let out_of_range = |key: &str, value: i64| TradeloopError::ConfigInvalid {
        section: "live".to_string(),
        key: key.to_string(),
        reason: format!("{} is out of range", value),
    };
    let int = |key: &str, default: u64| -> Result<u64, TradeloopError> {
        let value = config.get_int("live", key, default as i64);
        u64::try_from(value).map_err(|_| out_of_range(key, value))
    };
    let count = |key: &str, default: usize| -> Result<usize, TradeloopError> {
        let value = int(key, default as u64)?;
        usize::try_from(value).map_err(|_| out_of_range(key, value as i64))
    };
    let max_attempts = int("max_reconnect_attempts", u64::from(policy.max_attempts))?;

    Ok(SessionConfig {
        initial_balance: config.get_double("live", "initial_balance", defaults.initial_balance),
        window_size: count("window_size", defaults.window_size)?,
        min_candles: count("min_candles", defaults.min_candles)?,
        heartbeat_timeout: Duration::from_secs(int(
            "heartbeat_timeout_secs",
            defaults.heartbeat_timeout.as_secs(),
        )?),
        connect_timeout: Duration::from_secs(int(
            "connect_timeout_secs",
            defaults.connect_timeout.as_secs(),
        )?),
        message_limit: count("message_limit", defaults.message_limit)?,
        message_window: Duration::from_millis(int(
            "message_window_ms",
            defaults.message_window.as_millis() as u64,
        )?),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_secs(int("reconnect_base_secs", policy.base_delay.as_secs())?),
            max_delay: Duration::from_secs(int("reconnect_max_secs", policy.max_delay.as_secs())?),
            max_attempts: u32::try_from(max_attempts)
                .map_err(|_| out_of_range("max_reconnect_attempts", max_attempts as i64))?,
        },
        ..defaults
    })
}

fn runtime() -> Result<tokio::runtime::Runtime, TradeloopError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

/// Candles for the configured backtest range from CSV or, with the
/// `binance` feature, the exchange's REST API.
pub fn load_backtest_candles(
    config: &dyn ConfigPort,
    symbol: &str,
) -> Result<Vec<Candle>, TradeloopError> {
    let interval = config.get_string("backtest", "interval").unwrap_or_default();
    let start = optional_time(config, "backtest", "start")?;
    let end = optional_time(config, "backtest", "end")?;
    let source = config.get_string("backtest", "source").unwrap_or_default();

    if source == SOURCE_BINANCE {
        #[cfg(feature = "binance")]
        {
            use crate::adapters::binance::BinanceRest;
            let (Some(start), Some(end)) = (start, end) else {
                return Err(TradeloopError::ConfigMissing {
                    section: "backtest".into(),
                    key: "start".into(),
                });
            };
            let rest = BinanceRest::new();
            return runtime()?.block_on(rest.fetch_candles(symbol, &interval, start, end));
        }
        #[cfg(not(feature = "binance"))]
        {
            return Err(TradeloopError::ConfigInvalid {
                section: "backtest".into(),
                key: "source".into(),
                reason: "built without the binance feature".into(),
            });
        }
    }

    let data_dir = config.get_string("backtest", "data_dir").unwrap_or_default();
    let csv = CsvCandleSource::new(data_dir);
    match (start, end) {
        (None, None) => csv.load_all(symbol, &interval),
        (start, end) => {
            let start = start.unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
            let end = end.unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
            runtime()?.block_on(csv.fetch_candles(symbol, &interval, start, end))
        }
    }
}

pub fn run_backtest(
    config_path: &Path,
    strategy_path: Option<&Path>,
    output_path: Option<&Path>,
    trace_path: Option<&Path>,
    symbol_override: Option<&str>,
) -> Result<(), TradeloopError> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;

    let strategy = load_strategy(&adapter, strategy_path)?;
    eprintln!("Loading strategy: {}", strategy.name);

    let mut bt_config = build_backtest_config(&adapter);
    bt_config.debug_trace |= trace_path.is_some();

    let symbol = match symbol_override {
        Some(s) => s.to_string(),
        None => adapter.get_string("backtest", "symbol").unwrap_or_default(),
    };

    let candles = load_backtest_candles(&adapter, &symbol)?;
    eprintln!("Running backtest: {} on {} candles", symbol, candles.len());

    let result = backtest_engine::run_backtest(&candles, &strategy, &bt_config)?;
    print_backtest_summary(&symbol, &result);

    if let Some(path) = trace_path {
        write_trace(path, &result)?;
        eprintln!("Trace written to: {}", path.display());
    }
    if let Some(path) = output_path {
        write_json(path, &result)?;
        eprintln!("Result written to: {}", path.display());
    }
    Ok(())
}

fn print_backtest_summary(symbol: &str, result: &BacktestResult) {
    println!("=== Backtest: {} / {} ===", result.strategy_id, symbol);
    println!("Initial Balance:  {:.2}", result.initial_balance);
    println!("Final Balance:    {:.2}", result.final_balance);
    println!("Return:           {:.2}%", result.return_pct());
    println!("Max Drawdown:     -{:.2}%", result.max_drawdown_pct);
    print_metrics(&result.metrics);
}

fn print_metrics(metrics: &Metrics) {
    println!("Total Trades:     {}", metrics.total_trades);
    println!("Win Rate:         {:.1}%", metrics.win_rate);
    println!("Profit Factor:    {:.2}", metrics.profit_factor);
    println!("Net Profit:       {:.2}", metrics.net_profit);
    println!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), TradeloopError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| TradeloopError::InvalidData {
        reason: format!("failed to serialize result: {}", e),
    })?;
    fs::write(path, json)?;
    Ok(())
}

fn write_trace(path: &Path, result: &BacktestResult) -> Result<(), TradeloopError> {
    let mut file = std::io::BufWriter::new(fs::File::create(path)?);
    for entry in &result.trace {
        let line = serde_json::to_string(entry).map_err(|e| TradeloopError::InvalidData {
            reason: format!("failed to serialize trace: {}", e),
        })?;
        writeln!(file, "{}", line)?;
    }
    file.flush()?;
    Ok(())
}

pub fn run_dry_run(
    config_path: &Path,
    strategy_path: Option<&Path>,
) -> Result<(), TradeloopError> {
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    let strategy = load_strategy(&adapter, strategy_path)?;
    let bt_config = build_backtest_config(&adapter);

    println!("Config valid.");
    println!("  Strategy:        {} ({})", strategy.name, strategy.id);
    println!(
        "  Symbol:          {}",
        adapter.get_string("backtest", "symbol").unwrap_or_default()
    );
    println!(
        "  Interval:        {}",
        adapter.get_string("backtest", "interval").unwrap_or_default()
    );
    println!("  Initial balance: {:.2}", bt_config.initial_balance);
    println!(
        "  Min candles:     {}",
        strategy
            .minimum_candles()
            .max(backtest_engine::MIN_BACKTEST_CANDLES)
    );
    Ok(())
}

pub fn run_validate(strategy_path: &Path) -> Result<(), TradeloopError> {
    let adapter = load_config(strategy_path)?;
    validate_strategy_config(&adapter)?;
    let strategy = build_strategy(&adapter)?;

    println!("Strategy '{}' is valid.", strategy.id);
    println!("  Side: {}", strategy.side);
    println!("  Indicators:");
    for (name, indicator) in &strategy.indicators {
        println!(
            "    {} = {} (warm-up {} candles)",
            name,
            indicator,
            indicator.minimum_required()
        );
    }
    println!("  Entry (all):");
    for condition in &strategy.entry_conditions {
        println!("    {}", condition);
    }
    println!("  Exit (any):");
    for condition in &strategy.exit_conditions {
        println!("    {}", condition);
    }
    let risk = &strategy.risk_management;
    println!(
        "  Risk: stop {}%, take profit {}%, max size {}%, risk per trade {}%",
        risk.stop_loss_pct,
        risk.take_profit_pct,
        risk.max_position_size_pct,
        risk.risk_per_trade_pct
    );
    println!("  Minimum candles: {}", strategy.minimum_candles());
    Ok(())
}

fn run_live(
    config_path: &Path,
    strategy_path: Option<&Path>,
    duration: Option<Duration>,
    output_path: Option<&Path>,
) -> Result<(), TradeloopError> {
    let adapter = load_config(config_path)?;
    validate_live_config(&adapter)?;
    let strategy = load_strategy(&adapter, strategy_path)?;
    let session_config = build_session_config(&adapter)?;

    #[cfg(feature = "binance")]
    {
        use crate::adapters::binance::{BinanceRest, BinanceStream};
        use crate::adapters::memory_strategy_store::MemoryStrategyStore;
        use crate::live::manager::SessionManager;
        use crate::live::rate_limit::ConnectionBudget;
        use std::sync::Arc;

        let store = MemoryStrategyStore::with_strategies([strategy.clone()])?;
        let manager = SessionManager::new(
            Arc::new(BinanceRest::new()),
            Arc::new(BinanceStream::new()),
            Arc::new(store),
            Arc::new(ConnectionBudget::default()),
        );
        let report = runtime()?.block_on(drive_session(
            &manager,
            &strategy.id,
            session_config,
            duration,
        ))?;

        print_session_summary(&report);
        if let Some(path) = output_path {
            write_json(path, &report)?;
            eprintln!("Report written to: {}", path.display());
        }
        Ok(())
    }

    #[cfg(not(feature = "binance"))]
    {
        let _ = (strategy, session_config, duration, output_path);
        Err(TradeloopError::Connection {
            reason: "live trading requires the binance feature".into(),
        })
    }
}

/// Run one session until Ctrl-C, the optional duration, or the session
/// stopping on its own, then stop it and return the report.
pub async fn drive_session<D, T>(
    manager: &crate::live::manager::SessionManager<D, T>,
    strategy_id: &str,
    config: SessionConfig,
    duration: Option<Duration>,
) -> Result<SessionReport, TradeloopError>
where
    D: HistoricalData,
    T: crate::ports::stream_port::StreamTransport,
{
    use crate::live::session::SessionStatus;

    let session_id = format!("{}-{}", strategy_id, config.symbol.to_lowercase());
    let started = manager.start(&session_id, strategy_id, config).await?;
    eprintln!(
        "Session {} started: {} candles of history, Ctrl-C to stop",
        session_id, started.window_len
    );

    let mut snapshots = manager.subscribe(&session_id).await?;
    let deadline = tokio::time::sleep(duration.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);
    let mut trades_seen = started.trade_count;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping session {}", session_id);
                break;
            }
            _ = &mut deadline, if duration.is_some() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.trade_count != trades_seen {
                    trades_seen = snapshot.trade_count;
                    println!(
                        "[{}] trades={} balance={:.2} equity={:.2}",
                        session_id, snapshot.trade_count, snapshot.balance, snapshot.equity
                    );
                }
                if snapshot.status == SessionStatus::Stopped {
                    break;
                }
            }
        }
    }

    manager.stop(&session_id).await
}

fn print_session_summary(report: &SessionReport) {
    println!("=== Session: {} ===", report.session_id);
    println!("Stop Reason:      {}", report.stop_reason);
    println!("Initial Balance:  {:.2}", report.initial_balance);
    println!("Final Balance:    {:.2}", report.final_balance);
    println!("Max Drawdown:     -{:.2}%", report.max_drawdown_pct);
    print_metrics(&report.metrics);
}
