//! Binance stream payloads and their mapping to `StreamEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::candle::Candle;
use crate::ports::stream_port::StreamEvent;

#[derive(Debug, Serialize)]
pub struct SubscribeRequest<'a> {
    pub method: &'static str,
    pub params: &'a [String],
    pub id: u64,
}

impl<'a> SubscribeRequest<'a> {
    pub fn new(streams: &'a [String], id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: streams,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    ApiError { error: ApiErrorBody },
    Ack { id: u64 },
    Combined { data: MarketEvent },
    Raw(MarketEvent),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum MarketEvent {
    #[serde(rename = "kline")]
    Kline {
        #[serde(rename = "k")]
        kline: KlinePayload,
    },
    #[serde(rename = "trade")]
    Trade {
        #[serde(rename = "p")]
        price: String,
        #[serde(rename = "q")]
        quantity: String,
        #[serde(rename = "T")]
        time: i64,
    },
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

pub(crate) fn number(raw: &str, name: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid {} '{}'", name, raw))
}

pub(crate) fn timestamp(millis: i64, name: &str) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| format!("invalid {} {}", name, millis))
}

impl KlinePayload {
    fn to_candle(&self) -> Result<Candle, String> {
        Ok(Candle {
            open_time: timestamp(self.open_time, "open time")?,
            open: number(&self.open, "open")?,
            high: number(&self.high, "high")?,
            low: number(&self.low, "low")?,
            close: number(&self.close, "close")?,
            volume: number(&self.volume, "volume")?,
            close_time: timestamp(self.close_time, "close time")?,
        })
    }
}

fn market_event(event: MarketEvent) -> Result<StreamEvent, String> {
    match event {
        MarketEvent::Kline { kline } => Ok(StreamEvent::Candle {
            candle: kline.to_candle()?,
            closed: kline.closed,
        }),
        MarketEvent::Trade {
            price,
            quantity,
            time,
        } => Ok(StreamEvent::Trade {
            price: number(&price, "price")?,
            quantity: number(&quantity, "quantity")?,
            time: timestamp(time, "trade time")?,
        }),
    }
}

/// Decode a text frame. Anything unrecognised becomes `Malformed`.
pub fn parse_message(text: &str) -> StreamEvent {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(_) => return StreamEvent::Malformed(text.to_string()),
    };

    let decoded = match inbound {
        Inbound::Ack { id } => Ok(StreamEvent::Ack { id }),
        Inbound::ApiError { error } => Err(format!("api error {}: {}", error.code, error.msg)),
        Inbound::Combined { data } | Inbound::Raw(data) => market_event(data),
    };

    decoded.unwrap_or_else(|reason| StreamEvent::Malformed(format!("{}: {}", reason, text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KLINE: &str = r#"{"e":"kline","E":1704067260000,"s":"BTCUSDT","k":{"t":1704067200000,"T":1704067259999,"s":"BTCUSDT","i":"1m","o":"42000.10","c":"42010.50","h":"42020.00","l":"41990.00","v":"12.345","n":100,"x":true,"q":"0","V":"0","Q":"0","B":"0"}}"#;

    #[test]
    fn closed_kline_becomes_candle() {
        match parse_message(KLINE) {
            StreamEvent::Candle { candle, closed } => {
                assert!(closed);
                assert_eq!(candle.open, 42000.10);
                assert_eq!(candle.high, 42020.00);
                assert_eq!(candle.low, 41990.00);
                assert_eq!(candle.close, 42010.50);
                assert_eq!(candle.volume, 12.345);
                assert_eq!(candle.open_time.timestamp_millis(), 1_704_067_200_000);
                assert_eq!(candle.close_time.timestamp_millis(), 1_704_067_259_999);
            }
            other => panic!("expected candle, got {other:?}"),
        }
    }

    #[test]
    fn combined_stream_wrapper_is_unwrapped() {
        let text = format!(r#"{{"stream":"btcusdt@kline_1m","data":{}}}"#, KLINE);
        assert!(matches!(
            parse_message(&text),
            StreamEvent::Candle { closed: true, .. }
        ));
    }

    #[test]
    fn trade_tick() {
        let text = r#"{"e":"trade","E":1,"s":"BTCUSDT","t":7,"p":"42001.5","q":"0.25","T":1704067230000,"m":false}"#;
        match parse_message(text) {
            StreamEvent::Trade {
                price, quantity, ..
            } => {
                assert_eq!(price, 42001.5);
                assert_eq!(quantity, 0.25);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn subscription_ack() {
        assert_eq!(
            parse_message(r#"{"result":null,"id":3}"#),
            StreamEvent::Ack { id: 3 }
        );
    }

    #[test]
    fn api_error_is_malformed() {
        let event = parse_message(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#);
        match event {
            StreamEvent::Malformed(text) => assert!(text.contains("Invalid request")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn garbage_and_bad_numbers_are_malformed() {
        assert!(matches!(
            parse_message("not json"),
            StreamEvent::Malformed(_)
        ));
        let bad = KLINE.replace("42000.10", "abc");
        assert!(matches!(parse_message(&bad), StreamEvent::Malformed(_)));
        assert!(matches!(
            parse_message(r#"{"e":"depthUpdate","E":1}"#),
            StreamEvent::Malformed(_)
        ));
    }

    #[test]
    fn subscribe_request_shape() {
        let streams = vec!["btcusdt@kline_1m".to_string(), "btcusdt@trade".to_string()];
        let json = serde_json::to_value(SubscribeRequest::new(&streams, 1)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "method": "SUBSCRIBE",
                "params": ["btcusdt@kline_1m", "btcusdt@trade"],
                "id": 1
            })
        );
    }
}
