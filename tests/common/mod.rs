#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tradeloop::domain::candle::Candle;
use tradeloop::domain::error::TradeloopError;
use tradeloop::domain::indicator::IndicatorType;
use tradeloop::domain::position::Side;
use tradeloop::domain::strategy::{RiskManagement, StrategyDefinition};
use tradeloop::domain::strategy_parser::parse_conditions;
use tradeloop::ports::data_port::HistoricalData;
use tradeloop::ports::stream_port::{
    ControlMessage, StreamConnection, StreamEvent, StreamTransport,
};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly candle `index` hours after the start with open = high = low = close.
pub fn flat_candle(index: usize, close: f64) -> Candle {
    ohlc_candle(index, close, close, close, close)
}

pub fn ohlc_candle(index: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    let open_time = start_time() + Duration::hours(index as i64);
    Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume: 1.0,
        close_time: open_time + Duration::hours(1) - Duration::milliseconds(1),
    }
}

pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| flat_candle(i, c))
        .collect()
}

pub fn make_strategy(
    id: &str,
    indicators: &[(&str, IndicatorType)],
    entry: &str,
    exit: &str,
    risk: RiskManagement,
) -> StrategyDefinition {
    StrategyDefinition {
        id: id.to_string(),
        name: id.to_string(),
        side: Side::Long,
        indicators: indicators
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect::<BTreeMap<_, _>>(),
        entry_conditions: parse_conditions(entry).unwrap(),
        exit_conditions: parse_conditions(exit).unwrap(),
        risk_management: risk,
    }
}

pub fn risk(stop_loss_pct: f64, take_profit_pct: f64) -> RiskManagement {
    RiskManagement {
        stop_loss_pct,
        take_profit_pct,
        max_position_size_pct: 10.0,
        risk_per_trade_pct: 1.0,
    }
}

pub fn rsi_reversal() -> StrategyDefinition {
    make_strategy(
        "rsi_reversal",
        &[("rsi", IndicatorType::Rsi { period: 14 })],
        "rsi below 30",
        "rsi above 70",
        risk(2.0, 4.0),
    )
}

/// Enters when SMA(3) rises above 105 and exits when it falls below 100.
/// Wide risk limits keep exits on the signal.
pub fn sma_breakout() -> StrategyDefinition {
    make_strategy(
        "sma_breakout",
        &[("sma", IndicatorType::Sma { period: 3 })],
        "sma above 105",
        "sma below 100",
        risk(50.0, 500.0),
    )
}

pub struct MockHistoricalData {
    pub candles: Vec<Candle>,
    pub error: Option<String>,
    pub calls: Mutex<usize>,
}

impl MockHistoricalData {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles,
            error: None,
            calls: Mutex::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            candles: Vec::new(),
            error: Some(reason.to_string()),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl HistoricalData for MockHistoricalData {
    async fn fetch_candles(
        &self,
        _symbol: &str,
        _interval: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradeloopError> {
        *self.calls.lock().unwrap() += 1;
        match &self.error {
            Some(reason) => Err(TradeloopError::DataFetch {
                reason: reason.clone(),
            }),
            None => Ok(self.candles.clone()),
        }
    }
}

/// Test side of a scripted connection.
pub struct ConnectionHandle {
    pub events: mpsc::UnboundedSender<StreamEvent>,
    pub sent: mpsc::UnboundedReceiver<ControlMessage>,
}

pub struct MockConnection {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    sent: mpsc::UnboundedSender<ControlMessage>,
}

impl StreamConnection for MockConnection {
    async fn send(&mut self, message: ControlMessage) -> Result<(), TradeloopError> {
        self.sent
            .send(message)
            .map_err(|_| TradeloopError::Connection {
                reason: "mock peer gone".into(),
            })
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.events.close();
    }
}

/// Transport that hands out pre-scripted connections in order. A `None`
/// script, or an empty script queue, fails the connect attempt.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<Option<MockConnection>>>,
    connects: Mutex<Vec<Instant>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_connection(&self) -> ConnectionHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Some(MockConnection {
            events: events_rx,
            sent: sent_tx,
        }));
        ConnectionHandle {
            events: events_tx,
            sent: sent_rx,
        }
    }

    pub fn expect_failure(&self) {
        self.scripts.lock().unwrap().push_back(None);
    }

    /// Instants of every connect attempt, successful or not.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

impl StreamTransport for MockTransport {
    type Connection = MockConnection;

    async fn connect(
        &self,
        _symbol: &str,
        _interval: &str,
    ) -> Result<MockConnection, TradeloopError> {
        self.connects.lock().unwrap().push(Instant::now());
        match self.scripts.lock().unwrap().pop_front() {
            Some(Some(connection)) => Ok(connection),
            _ => Err(TradeloopError::Connection {
                reason: "connection refused".into(),
            }),
        }
    }
}
