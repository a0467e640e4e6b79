//! Historical market data port.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::domain::candle::Candle;
use crate::domain::error::TradeloopError;

pub trait HistoricalData: Send + Sync {
    /// Closed candles with `start <= open_time < end`, ascending by open time.
    ///
    /// Failures are reported as `DataFetch`.
    fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Candle>, TradeloopError>> + Send;
}
