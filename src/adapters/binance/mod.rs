//! Binance adapters: REST klines for history, WebSocket for live data.

pub mod messages;
pub mod rest;
pub mod stream;

pub use rest::BinanceRest;
pub use stream::BinanceStream;

pub const DEFAULT_REST_URL: &str = "https://api.binance.com";
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";
