//! Invest streaming client
//!
//! This crate keeps one authenticated WebSocket connection to the market-data
//! feed, sends candle/orderbook/instrument-info subscriptions over it and
//! delivers decoded server events to a single handler.

pub mod config;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod parser;
pub mod subscription;
pub mod websocket;

pub use config::{KeepaliveConfig, StreamingConfig, STREAMING_API_URL};
pub use error::{DecodeError, Result, StreamingError};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use metrics::StreamMetrics;
pub use parser::{
    Candle, CandleEvent, CandleInterval, ErrorEvent, ErrorPayload, EventKind, InstrumentInfo,
    InstrumentInfoEvent, OrderBook, OrderBookEvent, PriceLevel, ReportedInterval, StreamEvent,
    TradingStatus,
};
pub use subscription::{Action, Channel, SubscriptionRequest, MAX_ORDERBOOK_DEPTH};
pub use websocket::{EventHandler, StreamingClient};
