//! Binance REST klines as a historical data source.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::DEFAULT_REST_URL;
use super::messages::{number, timestamp};
use crate::domain::candle::Candle;
use crate::domain::error::TradeloopError;
use crate::ports::data_port::HistoricalData;

/// Maximum klines Binance returns per request.
pub const KLINES_PER_REQUEST: usize = 1000;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BinanceRest {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceRest {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_REST_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: client_with_timeout(REQUEST_TIMEOUT),
        }
    }

    /// Replace the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = client_with_timeout(timeout);
        self
    }

    async fn fetch_chunk(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, TradeloopError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let fetch_err = |e: reqwest::Error| TradeloopError::DataFetch {
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_uppercase()),
                ("interval", interval.to_string()),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", KLINES_PER_REQUEST.to_string()),
            ])
            .send()
            .await
            .map_err(fetch_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TradeloopError::DataFetch {
                reason: format!("GET {} returned {}: {}", url, status, body),
            });
        }

        let rows: Vec<Vec<Value>> = response.json().await.map_err(fetch_err)?;
        rows.iter().map(|row| parse_kline_row(row)).collect()
    }
}

impl Default for BinanceRest {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalData for BinanceRest {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradeloopError> {
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut candles: Vec<Candle> = Vec::new();

        while cursor < end_ms {
            let chunk = self.fetch_chunk(symbol, interval, cursor, end_ms - 1).await?;
            let Some(last) = chunk.last() else {
                break;
            };
            let next = last.open_time.timestamp_millis() + 1;
            let full = chunk.len() >= KLINES_PER_REQUEST;
            debug!(symbol, interval, count = chunk.len(), "klines chunk fetched");

            candles.extend(chunk.into_iter().filter(|c| c.open_time < end));
            if !full || next <= cursor {
                break;
            }
            cursor = next;
        }

        let now = Utc::now();
        candles.retain(|c| c.is_closed_at(now));
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        Ok(candles)
    }
}

fn client_with_timeout(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// One kline row: `[open_time, open, high, low, close, volume, close_time, ...]`
/// with prices as strings.
pub fn parse_kline_row(row: &[Value]) -> Result<Candle, TradeloopError> {
    let bad = |reason: String| TradeloopError::DataFetch {
        reason: format!("bad kline row: {}", reason),
    };
    let millis = |index: usize, name: &str| {
        row.get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| bad(format!("missing {}", name)))
            .and_then(|ms| timestamp(ms, name).map_err(bad))
    };
    let price = |index: usize, name: &str| {
        row.get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| bad(format!("missing {}", name)))
            .and_then(|raw| number(raw, name).map_err(bad))
    };

    Ok(Candle {
        open_time: millis(0, "open time")?,
        open: price(1, "open")?,
        high: price(2, "high")?,
        low: price(3, "low")?,
        close: price(4, "close")?,
        volume: price(5, "volume")?,
        close_time: millis(6, "close time")?,
    })
}
