//! Parser module for streaming feed events
//!
//! Inbound frames share the shape `{"event": ..., "time": ..., "payload": {...}}`.
//! The `event` discriminator is decoded first, then the whole frame is decoded
//! into the matching variant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

/// Candle interval accepted by the candle subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "2min")]
    TwoMinutes,
    #[serde(rename = "3min")]
    ThreeMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "10min")]
    TenMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "2hour")]
    TwoHours,
    #[serde(rename = "4hour")]
    FourHours,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 13] = [
        CandleInterval::OneMinute,
        CandleInterval::TwoMinutes,
        CandleInterval::ThreeMinutes,
        CandleInterval::FiveMinutes,
        CandleInterval::TenMinutes,
        CandleInterval::FifteenMinutes,
        CandleInterval::ThirtyMinutes,
        CandleInterval::Hour,
        CandleInterval::TwoHours,
        CandleInterval::FourHours,
        CandleInterval::Day,
        CandleInterval::Week,
        CandleInterval::Month,
    ];

    /// Wire name of the interval
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1min",
            CandleInterval::TwoMinutes => "2min",
            CandleInterval::ThreeMinutes => "3min",
            CandleInterval::FiveMinutes => "5min",
            CandleInterval::TenMinutes => "10min",
            CandleInterval::FifteenMinutes => "15min",
            CandleInterval::ThirtyMinutes => "30min",
            CandleInterval::Hour => "hour",
            CandleInterval::TwoHours => "2hour",
            CandleInterval::FourHours => "4hour",
            CandleInterval::Day => "day",
            CandleInterval::Week => "week",
            CandleInterval::Month => "month",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandleInterval::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| format!("unknown candle interval: {}", s))
    }
}

/// Interval reported on an inbound candle
///
/// Names this client does not know yet are kept as [`Other`](Self::Other) so
/// the candle is still delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum ReportedInterval {
    Known(CandleInterval),
    Other(String),
}

impl ReportedInterval {
    pub fn known(&self) -> Option<CandleInterval> {
        match self {
            ReportedInterval::Known(interval) => Some(*interval),
            ReportedInterval::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReportedInterval::Known(interval) => interval.as_str(),
            ReportedInterval::Other(name) => name,
        }
    }
}

impl PartialEq<CandleInterval> for ReportedInterval {
    fn eq(&self, other: &CandleInterval) -> bool {
        self.known() == Some(*other)
    }
}

impl fmt::Display for ReportedInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading status reported in instrument info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStatus {
    NormalTrading,
    NotAvailableForTrading,
    #[serde(other)]
    Unknown,
}

/// OHLCV candle payload
#[derive(Debug, Clone, Deserialize)]
pub struct Candle {
    pub figi: String,
    pub interval: ReportedInterval,

    /// Open price
    #[serde(rename = "o", with = "rust_decimal::serde::float")]
    pub open: Decimal,

    /// Close price
    #[serde(rename = "c", with = "rust_decimal::serde::float")]
    pub close: Decimal,

    /// High price
    #[serde(rename = "h", with = "rust_decimal::serde::float")]
    pub high: Decimal,

    /// Low price
    #[serde(rename = "l", with = "rust_decimal::serde::float")]
    pub low: Decimal,

    /// Traded volume
    #[serde(rename = "v", with = "rust_decimal::serde::float")]
    pub volume: Decimal,

    /// Candle start time
    pub time: DateTime<Utc>,
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot payload
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBook {
    pub figi: String,
    pub depth: u32,

    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Instrument trading parameters payload
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentInfo {
    pub figi: String,
    pub trade_status: TradingStatus,

    #[serde(with = "rust_decimal::serde::float")]
    pub min_price_increment: Decimal,

    pub lot: u32,

    /// Accrued coupon interest, bonds only
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrued_interest: Option<Decimal>,

    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub limit_up: Option<Decimal>,

    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub limit_down: Option<Decimal>,
}

/// Error payload pushed by the server, usually in reply to a bad request
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub request_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleEvent {
    pub time: DateTime<Utc>,
    #[serde(rename = "payload")]
    pub candle: Candle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookEvent {
    pub time: DateTime<Utc>,
    #[serde(rename = "payload")]
    pub order_book: OrderBook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentInfoEvent {
    pub time: DateTime<Utc>,
    #[serde(rename = "payload")]
    pub info: InstrumentInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEvent {
    pub time: DateTime<Utc>,
    #[serde(rename = "payload")]
    pub error: ErrorPayload,
}

/// Discriminator values the client knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Candle,
    OrderBook,
    InstrumentInfo,
    Error,
}

impl EventKind {
    /// Map a discriminator to a kind; `None` for kinds this client does not know.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "candle" => Some(EventKind::Candle),
            "orderbook" => Some(EventKind::OrderBook),
            "instrument_info" => Some(EventKind::InstrumentInfo),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Candle => "candle",
            EventKind::OrderBook => "orderbook",
            EventKind::InstrumentInfo => "instrument_info",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing envelope, only the discriminator is read
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
}

/// Decoded server event delivered to the handler
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Candle(CandleEvent),
    OrderBook(OrderBookEvent),
    InstrumentInfo(InstrumentInfoEvent),
    Error(ErrorEvent),
}

impl StreamEvent {
    /// Decode a raw frame
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(frame).map_err(DecodeError::Envelope)?;

        let kind = match EventKind::from_name(&envelope.event) {
            Some(kind) => kind,
            None => return Err(DecodeError::Unrecognized(envelope.event)),
        };

        match kind {
            EventKind::Candle => decode_payload(frame, kind).map(StreamEvent::Candle),
            EventKind::OrderBook => decode_payload(frame, kind).map(StreamEvent::OrderBook),
            EventKind::InstrumentInfo => {
                decode_payload(frame, kind).map(StreamEvent::InstrumentInfo)
            }
            EventKind::Error => decode_payload(frame, kind).map(StreamEvent::Error),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Candle(_) => EventKind::Candle,
            StreamEvent::OrderBook(_) => EventKind::OrderBook,
            StreamEvent::InstrumentInfo(_) => EventKind::InstrumentInfo,
            StreamEvent::Error(_) => EventKind::Error,
        }
    }

    /// Instrument the event refers to; error events carry none.
    pub fn figi(&self) -> Option<&str> {
        match self {
            StreamEvent::Candle(event) => Some(&event.candle.figi),
            StreamEvent::OrderBook(event) => Some(&event.order_book.figi),
            StreamEvent::InstrumentInfo(event) => Some(&event.info.figi),
            StreamEvent::Error(_) => None,
        }
    }

    /// Server timestamp of the event
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            StreamEvent::Candle(event) => event.time,
            StreamEvent::OrderBook(event) => event.time,
            StreamEvent::InstrumentInfo(event) => event.time,
            StreamEvent::Error(event) => event.time,
        }
    }
}

fn decode_payload<'a, T>(frame: &'a [u8], kind: EventKind) -> Result<T, DecodeError>
where
    T: Deserialize<'a>,
{
    serde_json::from_slice(frame).map_err(|source| DecodeError::Payload {
        kind: kind.as_str(),
        source,
    })
}

#[derive(Deserialize)]
struct FloatDecimal(#[serde(with = "rust_decimal::serde::float")] Decimal);

/// Custom deserializer for price levels from `[price, quantity]` number pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<(FloatDecimal, FloatDecimal)> = Deserialize::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(price, quantity)| PriceLevel {
            price: price.0,
            quantity: quantity.0,
        })
        .collect())
}
