//! Subscription control frames
//!
//! Builds and validates the subscribe/unsubscribe requests sent to the feed.
//! No subscription table is kept: every request is forwarded as-is.

use serde::Serialize;
use std::fmt;

use crate::error::{Result, StreamingError};
use crate::parser::CandleInterval;

/// Upper bound for the orderbook subscription depth
pub const MAX_ORDERBOOK_DEPTH: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Subscribe => "subscribe",
            Action::Unsubscribe => "unsubscribe",
        }
    }
}

/// Event category addressed by a request, with its kind-specific parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Candle { interval: CandleInterval },
    OrderBook { depth: u32 },
    InstrumentInfo,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Candle { .. } => "candle",
            Channel::OrderBook { .. } => "orderbook",
            Channel::InstrumentInfo => "instrument_info",
        }
    }
}

/// A single subscribe or unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub channel: Channel,
    pub action: Action,
    pub figi: String,
    /// Caller-chosen correlation id, echoed back by the server
    pub request_id: String,
}

/// Wire shape of a control frame. Field order is the order on the wire.
#[derive(Serialize)]
struct ControlFrame<'a> {
    event: String,
    request_id: &'a str,
    figi: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<CandleInterval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<u32>,
}

impl SubscriptionRequest {
    pub fn new(channel: Channel, action: Action, figi: &str, request_id: &str) -> Self {
        Self {
            channel,
            action,
            figi: figi.to_string(),
            request_id: request_id.to_string(),
        }
    }

    pub fn candle(action: Action, figi: &str, interval: CandleInterval, request_id: &str) -> Self {
        Self::new(Channel::Candle { interval }, action, figi, request_id)
    }

    pub fn orderbook(action: Action, figi: &str, depth: u32, request_id: &str) -> Self {
        Self::new(Channel::OrderBook { depth }, action, figi, request_id)
    }

    pub fn instrument_info(action: Action, figi: &str, request_id: &str) -> Self {
        Self::new(Channel::InstrumentInfo, action, figi, request_id)
    }

    /// `<kind>:<action>` tag, e.g. `candle:subscribe`
    pub fn event_name(&self) -> String {
        format!("{}:{}", self.channel.name(), self.action.as_str())
    }

    /// Check the request parameters before anything is written
    pub fn validate(&self) -> Result<()> {
        if let Channel::OrderBook { depth } = self.channel {
            if !(1..=MAX_ORDERBOOK_DEPTH).contains(&depth) {
                return Err(StreamingError::InvalidDepth {
                    depth,
                    max: MAX_ORDERBOOK_DEPTH,
                });
            }
        }
        Ok(())
    }

    /// Validate and serialize to the JSON text frame
    pub fn encode(&self) -> Result<String> {
        self.validate()?;

        let (interval, depth) = match self.channel {
            Channel::Candle { interval } => (Some(interval), None),
            Channel::OrderBook { depth } => (None, Some(depth)),
            Channel::InstrumentInfo => (None, None),
        };

        let frame = ControlFrame {
            event: self.event_name(),
            request_id: &self.request_id,
            figi: &self.figi,
            interval,
            depth,
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

impl fmt::Display for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.event_name(), self.figi, self.request_id)
    }
}
