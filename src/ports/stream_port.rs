//! Streaming market data port.
//!
//! A transport opens one connection per session. The connection yields
//! `StreamEvent`s and accepts `ControlMessage`s; the live session never sees
//! the wire format.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::domain::candle::Candle;
use crate::domain::error::TradeloopError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Subscription acknowledged.
    Ack { id: u64 },
    /// Candle update; `closed` is set once the candle is final.
    Candle { candle: Candle, closed: bool },
    Trade {
        price: f64,
        quantity: f64,
        time: DateTime<Utc>,
    },
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Error(String),
    Closed(Option<String>),
    /// A payload that could not be decoded.
    Malformed(String),
}

impl StreamEvent {
    /// Transport control events. These bypass the message rate limit.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            StreamEvent::Ping(_)
                | StreamEvent::Pong(_)
                | StreamEvent::Error(_)
                | StreamEvent::Closed(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Subscribe { streams: Vec<String>, id: u64 },
    Pong(Vec<u8>),
}

pub trait StreamConnection: Send {
    fn send(
        &mut self,
        message: ControlMessage,
    ) -> impl Future<Output = Result<(), TradeloopError>> + Send;

    /// Next inbound event, or `None` once the stream has ended.
    ///
    /// Must be cancel safe: the session polls it inside `select!`.
    fn next_event(&mut self) -> impl Future<Output = Option<StreamEvent>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub trait StreamTransport: Send + Sync + 'static {
    type Connection: StreamConnection + 'static;

    fn connect(
        &self,
        symbol: &str,
        interval: &str,
    ) -> impl Future<Output = Result<Self::Connection, TradeloopError>> + Send;
}

/// Channel names subscribed for a symbol: klines and trades.
pub fn channels(symbol: &str, interval: &str) -> Vec<String> {
    let symbol = symbol.to_lowercase();
    vec![
        format!("{}@kline_{}", symbol, interval),
        format!("{}@trade", symbol),
    ]
}
