//! Binance WebSocket market stream.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::DEFAULT_STREAM_URL;
use super::messages::{SubscribeRequest, parse_message};
use crate::domain::error::TradeloopError;
use crate::ports::stream_port::{ControlMessage, StreamConnection, StreamEvent, StreamTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct BinanceStream {
    url: String,
}

impl BinanceStream {
    pub fn new() -> Self {
        Self::with_url(DEFAULT_STREAM_URL)
    }

    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Default for BinanceStream {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTransport for BinanceStream {
    type Connection = BinanceConnection;

    async fn connect(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<BinanceConnection, TradeloopError> {
        debug!(url = %self.url, symbol, interval, "connecting");
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TradeloopError::Connection {
                reason: format!("connect to {} failed: {}", self.url, e),
            })?;
        Ok(BinanceConnection { ws })
    }
}

pub struct BinanceConnection {
    ws: WsStream,
}

impl StreamConnection for BinanceConnection {
    async fn send(&mut self, message: ControlMessage) -> Result<(), TradeloopError> {
        let frame = match message {
            ControlMessage::Subscribe { streams, id } => {
                let body = serde_json::to_string(&SubscribeRequest::new(&streams, id)).map_err(
                    |e| TradeloopError::Connection {
                        reason: e.to_string(),
                    },
                )?;
                Message::Text(body)
            }
            ControlMessage::Pong(payload) => Message::Pong(payload),
        };
        self.ws
            .send(frame)
            .await
            .map_err(|e| TradeloopError::Connection {
                reason: format!("send failed: {}", e),
            })
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let event = match self.ws.next().await? {
                Ok(Message::Text(text)) => parse_message(&text),
                Ok(Message::Ping(payload)) => StreamEvent::Ping(payload),
                Ok(Message::Pong(payload)) => StreamEvent::Pong(payload),
                Ok(Message::Close(frame)) => {
                    StreamEvent::Closed(frame.map(|f| format!("{} {}", f.code, f.reason)))
                }
                Ok(Message::Binary(bytes)) => {
                    StreamEvent::Malformed(format!("unexpected binary frame of {} bytes", bytes.len()))
                }
                Ok(Message::Frame(_)) => continue,
                Err(e) => StreamEvent::Error(e.to_string()),
            };
            return Some(event);
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "close handshake failed");
        }
    }
}
