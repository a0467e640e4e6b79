//! A single live trading session.
//!
//! Each session runs as one tokio task that owns its candle window, ledger,
//! message limiter and reconnect machine. Events are processed one at a time,
//! so the ledger has a single writer. The task publishes a snapshot after
//! every state change and returns a `SessionReport` when it stops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::candle::Candle;
use crate::domain::decision::{Action, DecisionState, apply, decide};
use crate::domain::error::TradeloopError;
use crate::domain::indicator::{IndicatorSet, Readings};
use crate::domain::ledger::{DrawdownPoint, EquityPoint, TradeLedger};
use crate::domain::metrics::Metrics;
use crate::domain::position::{ExitReason, Position, Trade};
use crate::domain::strategy::StrategyDefinition;
use crate::live::backoff::{ReconnectMachine, ReconnectPolicy};
use crate::live::rate_limit::{
    ConnectionBudget, DEFAULT_MESSAGE_LIMIT, DEFAULT_MESSAGE_WINDOW, MessageRateLimiter,
};
use crate::live::window::{CandleWindow, WindowUpdate};
use crate::ports::stream_port::{
    ControlMessage, StreamConnection, StreamEvent, StreamTransport, channels,
};

pub const DEFAULT_WINDOW_SIZE: usize = 100;
pub const DEFAULT_MIN_CANDLES: usize = 50;
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const STOP_REQUESTED: &str = "stopped by request";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub symbol: String,
    pub interval: String,
    pub initial_balance: f64,
    pub window_size: usize,
    pub min_candles: usize,
    pub heartbeat_timeout: Duration,
    /// Bound on a connect attempt and on every control send or close.
    pub connect_timeout: Duration,
    pub message_limit: usize,
    pub message_window: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            initial_balance: crate::domain::backtest::DEFAULT_INITIAL_BALANCE,
            window_size: DEFAULT_WINDOW_SIZE,
            min_candles: DEFAULT_MIN_CANDLES,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            message_limit: DEFAULT_MESSAGE_LIMIT,
            message_window: DEFAULT_MESSAGE_WINDOW,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Running,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub status: SessionStatus,
    pub balance: f64,
    pub equity: f64,
    pub position: Option<Position>,
    pub trade_count: usize,
    pub last_price: Option<f64>,
    pub window_len: usize,
    pub reconnect_attempt: Option<u32>,
    pub dropped_messages: u64,
    pub indicators: Readings,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub max_drawdown_pct: f64,
    pub stop_reason: String,
    pub stopped_at: DateTime<Utc>,
}

enum PumpExit {
    Stop,
    Disconnected(String),
}

pub(crate) struct Session {
    id: String,
    strategy: StrategyDefinition,
    config: SessionConfig,
    window: CandleWindow,
    ledger: TradeLedger,
    limiter: MessageRateLimiter,
    machine: ReconnectMachine,
    status: SessionStatus,
    last_price: Option<f64>,
    display: Readings,
    dropped_messages: u64,
    stop_reason: Option<String>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        strategy: StrategyDefinition,
        config: SessionConfig,
        history: Vec<Candle>,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let window = CandleWindow::with_history(config.window_size, history);
        let last_price = window.last().map(|c| c.close);
        let ledger = TradeLedger::new(config.initial_balance, Utc::now());
        let limiter = MessageRateLimiter::new(config.message_limit, config.message_window);
        let machine = ReconnectMachine::new(config.reconnect.clone());

        let mut session = Self {
            id,
            strategy,
            config,
            window,
            ledger,
            limiter,
            machine,
            status: SessionStatus::Initializing,
            last_price,
            display: Readings::new(),
            dropped_messages: 0,
            stop_reason: None,
            snapshots: watch::Sender::new(placeholder_snapshot()),
        };
        session.refresh_display(false);
        let snapshot = session.snapshot();
        session.snapshots.send_replace(snapshot);
        let rx = session.snapshots.subscribe();
        (session, rx)
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let equity = match self.last_price {
            Some(price) => self.ledger.equity_at(price),
            None => self.ledger.balance(),
        };
        SessionSnapshot {
            session_id: self.id.clone(),
            strategy_id: self.strategy.id.clone(),
            symbol: self.config.symbol.clone(),
            status: self.status,
            balance: self.ledger.balance(),
            equity,
            position: self.ledger.position().cloned(),
            trade_count: self.ledger.trades().len(),
            last_price: self.last_price,
            window_len: self.window.len(),
            reconnect_attempt: self.machine.attempt(),
            dropped_messages: self.dropped_messages,
            indicators: self.display.clone(),
            stop_reason: self.stop_reason.clone(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.publish();
    }

    /// Recompute indicators for display over the closed window, plus the
    /// forming candle when `include_forming` is set. Failures leave the
    /// previous readings in place.
    fn refresh_display(&mut self, include_forming: bool) {
        let candles = if include_forming {
            self.window.with_forming()
        } else {
            self.window.closed()
        };
        if let Ok(set) = IndicatorSet::compute(&candles, &self.strategy.indicators) {
            self.display = set.latest();
        }
    }

    fn on_closed_candle(&mut self, candle: Candle) {
        match self.window.push_closed(candle.clone()) {
            WindowUpdate::Ignored => {
                debug!(session = %self.id, open_time = %candle.open_time, "stale candle ignored");
                return;
            }
            WindowUpdate::Replaced => {
                debug!(session = %self.id, open_time = %candle.open_time, "closed candle replaced");
            }
            WindowUpdate::Appended => {}
        }
        self.last_price = Some(candle.close);

        if self.window.len() < self.config.min_candles {
            debug!(
                session = %self.id,
                have = self.window.len(),
                need = self.config.min_candles,
                "window warming up"
            );
            self.refresh_display(false);
            return;
        }

        let set = match IndicatorSet::compute(&self.window.closed(), &self.strategy.indicators) {
            Ok(set) => set,
            Err(e) => {
                debug!(session = %self.id, error = %e, "indicators not ready");
                return;
            }
        };
        let current = set.latest();
        let previous = set.previous();

        let action = decide(
            &DecisionState::new(&self.strategy, &self.ledger),
            &current,
            previous.as_ref(),
            &candle,
        );
        debug!(session = %self.id, close = candle.close, %action, "candle evaluated");

        apply(&mut self.ledger, &action, &candle);
        self.ledger.mark(candle.close_time, candle.close);
        self.display = current;
    }

    fn on_data(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Ack { id } => {
                debug!(session = %self.id, id, "subscription acknowledged");
            }
            StreamEvent::Candle {
                candle,
                closed: true,
            } => self.on_closed_candle(candle),
            StreamEvent::Candle {
                candle,
                closed: false,
            } => {
                let price = candle.close;
                if self.window.update_forming(candle) {
                    self.last_price = Some(price);
                    self.refresh_display(true);
                }
            }
            StreamEvent::Trade { price, .. } => {
                self.last_price = Some(price);
            }
            StreamEvent::Malformed(raw) => {
                warn!(session = %self.id, payload = %raw, "malformed message ignored");
            }
            StreamEvent::Ping(_)
            | StreamEvent::Pong(_)
            | StreamEvent::Error(_)
            | StreamEvent::Closed(_) => {}
        }
    }

    /// Read events until stop, disconnect or heartbeat expiry.
    async fn pump<C: StreamConnection>(
        &mut self,
        conn: &mut C,
        stop: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        let timeout = self.config.heartbeat_timeout;
        let heartbeat = tokio::time::sleep(timeout);
        tokio::pin!(heartbeat);

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.changed() => return PumpExit::Stop,
                _ = &mut heartbeat => {
                    return PumpExit::Disconnected("heartbeat timeout".to_string());
                }
                event = conn.next_event() => event,
            };

            let Some(event) = event else {
                return PumpExit::Disconnected("stream ended".to_string());
            };

            if !event.is_control() && !self.limiter.try_acquire(Instant::now()) {
                self.dropped_messages += 1;
                debug!(session = %self.id, "message dropped by rate limit");
                continue;
            }

            match event {
                StreamEvent::Ping(payload) => {
                    heartbeat.as_mut().reset(Instant::now() + timeout);
                    let pong = ControlMessage::Pong(payload);
                    if let Err(reason) = send_within(self.config.connect_timeout, conn, pong).await
                    {
                        return PumpExit::Disconnected(reason);
                    }
                }
                StreamEvent::Pong(_) => {
                    heartbeat.as_mut().reset(Instant::now() + timeout);
                }
                StreamEvent::Error(reason) => return PumpExit::Disconnected(reason),
                StreamEvent::Closed(reason) => {
                    return PumpExit::Disconnected(
                        reason.unwrap_or_else(|| "closed by server".to_string()),
                    );
                }
                data => {
                    self.on_data(data);
                    self.publish();
                }
            }
        }
    }

    /// Connect unless a stop arrives first; `None` means stop was requested.
    async fn connect_or_stop<T: StreamTransport>(
        &self,
        transport: &T,
        stop: &mut watch::Receiver<bool>,
    ) -> Option<Result<T::Connection, TradeloopError>> {
        let limit = self.config.connect_timeout;
        let attempt = tokio::time::timeout(
            limit,
            transport.connect(&self.config.symbol, &self.config.interval),
        );
        tokio::select! {
            biased;
            _ = stop.changed() => None,
            result = attempt => Some(result.unwrap_or_else(|_| {
                Err(TradeloopError::Connection {
                    reason: format!("connect timed out after {}s", limit.as_secs()),
                })
            })),
        }
    }

    async fn wait_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = stop.changed() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    /// Drive the session until stopped. `budget` gates every reconnect attempt;
    /// the first connection was already paid for by the caller.
    pub(crate) async fn run<T: StreamTransport>(
        mut self,
        transport: Arc<T>,
        budget: Arc<ConnectionBudget>,
        mut stop: watch::Receiver<bool>,
    ) -> SessionReport {
        let streams = channels(&self.config.symbol, &self.config.interval);
        let mut first_attempt = true;
        let mut subscribe_id: u64 = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            let connected = if first_attempt {
                first_attempt = false;
                self.connect_or_stop(transport.as_ref(), &mut stop).await
            } else {
                match budget.try_acquire() {
                    Ok(()) => self.connect_or_stop(transport.as_ref(), &mut stop).await,
                    Err(e) => Some(Err(e)),
                }
            };
            let Some(connected) = connected else {
                break;
            };

            let failure = match connected {
                Ok(mut conn) => {
                    subscribe_id += 1;
                    let subscribe = ControlMessage::Subscribe {
                        streams: streams.clone(),
                        id: subscribe_id,
                    };
                    let limit = self.config.connect_timeout;
                    let exit = match send_within(limit, &mut conn, subscribe).await {
                        Ok(()) => {
                            self.machine.on_connected();
                            info!(session = %self.id, symbol = %self.config.symbol, "stream connected");
                            self.set_status(SessionStatus::Running);
                            self.pump(&mut conn, &mut stop).await
                        }
                        Err(reason) => PumpExit::Disconnected(reason),
                    };
                    if tokio::time::timeout(limit, conn.close()).await.is_err() {
                        warn!(session = %self.id, "stream close timed out");
                    }
                    match exit {
                        PumpExit::Stop => break,
                        PumpExit::Disconnected(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            warn!(session = %self.id, reason = %failure, "stream disconnected");
            match self.machine.on_failure(&failure) {
                Some(delay) => {
                    self.set_status(SessionStatus::Reconnecting);
                    info!(
                        session = %self.id,
                        attempt = self.machine.attempt().unwrap_or(0),
                        delay_ms = delay.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    if Self::wait_or_stop(delay, &mut stop).await {
                        break;
                    }
                }
                None => {
                    if let crate::live::backoff::ConnectionState::Stopped { reason } =
                        self.machine.state()
                    {
                        self.stop_reason = Some(reason.clone());
                    }
                    warn!(session = %self.id, reason = ?self.stop_reason, "session giving up");
                    break;
                }
            }
        }

        self.finish()
    }

    /// Force-exit any open position at the last known price and build the report.
    fn finish(mut self) -> SessionReport {
        let reason = self
            .stop_reason
            .clone()
            .unwrap_or_else(|| STOP_REQUESTED.to_string());
        self.machine.stop(reason.clone());
        let now = Utc::now();

        if let (true, Some(price)) = (self.ledger.in_position(), self.last_price) {
            let exit = Action::Exit {
                price,
                reason: ExitReason::SessionStopped,
            };
            if let Some(candle) = self.exit_candle(now, price) {
                apply(&mut self.ledger, &exit, &candle);
            }
        }
        if let Some(price) = self.last_price {
            self.ledger.mark(now, price);
        }

        self.stop_reason = Some(reason.clone());
        self.set_status(SessionStatus::Stopped);
        info!(
            session = %self.id,
            trades = self.ledger.trades().len(),
            final_balance = self.ledger.balance(),
            reason = %reason,
            "session stopped"
        );

        let trades = self.ledger.trades().to_vec();
        SessionReport {
            session_id: self.id.clone(),
            strategy_id: self.strategy.id.clone(),
            symbol: self.config.symbol.clone(),
            initial_balance: self.ledger.initial_balance(),
            final_balance: self.ledger.balance(),
            metrics: Metrics::compute(&trades),
            trades,
            equity_curve: self.ledger.equity_curve().to_vec(),
            drawdown_curve: self.ledger.drawdown_curve().to_vec(),
            max_drawdown_pct: self.ledger.max_drawdown_pct(),
            stop_reason: reason,
            stopped_at: now,
        }
    }

    /// Synthetic candle carrying the stop time and price for `apply`.
    fn exit_candle(&self, now: DateTime<Utc>, price: f64) -> Option<Candle> {
        Some(Candle {
            open_time: self.window.last()?.open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            close_time: now,
        })
    }
}

async fn send_within<C: StreamConnection>(
    limit: Duration,
    conn: &mut C,
    message: ControlMessage,
) -> Result<(), String> {
    match tokio::time::timeout(limit, conn.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("send timed out after {}s", limit.as_secs())),
    }
}

fn placeholder_snapshot() -> SessionSnapshot {
    SessionSnapshot {
        session_id: String::new(),
        strategy_id: String::new(),
        symbol: String::new(),
        status: SessionStatus::Initializing,
        balance: 0.0,
        equity: 0.0,
        position: None,
        trade_count: 0,
        last_price: None,
        window_len: 0,
        reconnect_attempt: None,
        dropped_messages: 0,
        indicators: Readings::new(),
        stop_reason: None,
    }
}
