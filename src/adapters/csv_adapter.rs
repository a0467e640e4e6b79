//! CSV candle source.
//!
//! Reads `<dir>/<SYMBOL>_<interval>.csv` with the header
//! `open_time,open,high,low,close,volume,close_time`, times in epoch
//! milliseconds.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::StringRecord;

use crate::domain::candle::Candle;
use crate::domain::error::TradeloopError;
use crate::ports::data_port::HistoricalData;

pub struct CsvCandleSource {
    base_path: PathBuf,
}

impl CsvCandleSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn csv_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", symbol.to_uppercase(), interval))
    }

    /// Every candle in the symbol's file, ascending by open time.
    pub fn load_all(&self, symbol: &str, interval: &str) -> Result<Vec<Candle>, TradeloopError> {
        read_candles(&self.csv_path(symbol, interval))
    }

    fn load_range(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradeloopError> {
        let mut candles = self.load_all(symbol, interval)?;
        candles.retain(|c| c.open_time >= start && c.open_time < end);
        Ok(candles)
    }
}

impl HistoricalData for CsvCandleSource {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradeloopError> {
        self.load_range(symbol, interval, start, end)
    }
}

/// Read a candle CSV file from disk.
pub fn read_candles(path: &Path) -> Result<Vec<Candle>, TradeloopError> {
    let content = fs::read_to_string(path).map_err(|e| TradeloopError::DataFetch {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;

    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut candles = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| TradeloopError::DataFetch {
            reason: format!("CSV parse error: {}", e),
        })?;
        // header is line 1
        candles.push(parse_record(&record, row + 2)?);
    }

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

/// Write candles in the same layout `read_candles` accepts.
pub fn write_candles(path: &Path, candles: &[Candle]) -> Result<(), TradeloopError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TradeloopError::DataFetch {
        reason: format!("failed to create {}: {}", path.display(), e),
    })?;
    let to_err = |e: csv::Error| TradeloopError::DataFetch {
        reason: format!("CSV write error: {}", e),
    };

    wtr.write_record([
        "open_time",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "close_time",
    ])
    .map_err(to_err)?;
    for c in candles {
        wtr.write_record([
            c.open_time.timestamp_millis().to_string(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
            c.close_time.timestamp_millis().to_string(),
        ])
        .map_err(to_err)?;
    }
    wtr.flush()?;
    Ok(())
}

fn field<'r>(
    record: &'r StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<&'r str, TradeloopError> {
    record
        .get(index)
        .map(str::trim)
        .ok_or_else(|| TradeloopError::DataFetch {
            reason: format!("line {}: missing {} column", line, name),
        })
}

fn price(
    record: &StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<f64, TradeloopError> {
    let raw = field(record, index, name, line)?;
    raw.parse().map_err(|e| TradeloopError::DataFetch {
        reason: format!("line {}: invalid {} value '{}': {}", line, name, raw, e),
    })
}

fn millis(
    record: &StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<DateTime<Utc>, TradeloopError> {
    let raw = field(record, index, name, line)?;
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| TradeloopError::DataFetch {
            reason: format!("line {}: invalid {} timestamp '{}'", line, name, raw),
        })
}

fn parse_record(record: &StringRecord, line: usize) -> Result<Candle, TradeloopError> {
    Ok(Candle {
        open_time: millis(record, 0, "open_time", line)?,
        open: price(record, 1, "open", line)?,
        high: price(record, 2, "high", line)?,
        low: price(record, 3, "low", line)?,
        close: price(record, 4, "close", line)?,
        volume: price(record, 5, "volume", line)?,
        close_time: millis(record, 6, "close_time", line)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const HOUR_MS: i64 = 3_600_000;
    const START_MS: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

    fn row(i: i64, close: f64) -> String {
        let open = START_MS + i * HOUR_MS;
        format!(
            "{},{},{},{},{},12.5,{}\n",
            open,
            close,
            close + 1.0,
            close - 1.0,
            close,
            open + HOUR_MS - 1
        )
    }

    fn setup_test_data() -> (TempDir, CsvCandleSource) {
        let dir = TempDir::new().unwrap();
        let mut content = String::from("open_time,open,high,low,close,volume,close_time\n");
        // written out of order on purpose
        content.push_str(&row(2, 102.0));
        content.push_str(&row(0, 100.0));
        content.push_str(&row(1, 101.0));
        fs::write(dir.path().join("BTCUSDT_1h.csv"), content).unwrap();
        fs::write(
            dir.path().join("BAD_1h.csv"),
            "open_time,open,high,low,close,volume,close_time\nx,1,1,1,1,1,1\n",
        )
        .unwrap();
        let source = CsvCandleSource::new(dir.path());
        (dir, source)
    }

    #[tokio::test]
    async fn fetch_returns_sorted_candles() {
        let (_dir, source) = setup_test_data();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let candles = source.fetch_candles("btcusdt", "1h", start, end).await.unwrap();

        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].open_time, start);
        assert_eq!(candles[0].close, 100.0);
        assert_eq!(candles[0].high, 101.0);
        assert_eq!(candles[0].low, 99.0);
        assert_eq!(candles[0].volume, 12.5);
        assert_eq!(candles[2].close, 102.0);
    }

    #[tokio::test]
    async fn fetch_filters_half_open_range() {
        let (_dir, source) = setup_test_data();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();

        let candles = source.fetch_candles("BTCUSDT", "1h", start, end).await.unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 101.0);
    }

    #[tokio::test]
    async fn missing_file_is_fetch_error() {
        let (_dir, source) = setup_test_data();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let result = source.fetch_candles("ETHUSDT", "1h", start, start).await;
        assert!(matches!(result, Err(TradeloopError::DataFetch { .. })));
    }

    #[test]
    fn bad_timestamp_names_the_line() {
        let (_dir, source) = setup_test_data();
        match source.load_all("BAD", "1h") {
            Err(TradeloopError::DataFetch { reason }) => {
                assert!(reason.contains("line 2"), "{reason}");
                assert!(reason.contains("open_time"), "{reason}");
            }
            other => panic!("expected DataFetch, got {other:?}"),
        }
    }

    #[test]
    fn written_file_reads_back() {
        let (dir, source) = setup_test_data();
        let candles = source.load_all("BTCUSDT", "1h").unwrap();
        let path = dir.path().join("COPY_1h.csv");

        write_candles(&path, &candles).unwrap();

        assert_eq!(read_candles(&path).unwrap(), candles);
    }
}
