//! Invest streaming demo
//!
//! Connects to the streaming feed, subscribes the configured instruments and
//! logs every event until Ctrl-C.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use invest_streaming::{
    CandleInterval, StreamEvent, StreamingClient, StreamingConfig, StreamingError, TracingLogger,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Invest streaming client");

    let config = StreamingConfig::from_env()?;
    info!(config = ?config, "Configuration loaded");

    let figis: Vec<String> = env::var("FIGIS")
        .unwrap_or_else(|_| "BBG000B9XRY4".to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    let interval: CandleInterval = env::var("CANDLE_INTERVAL")
        .unwrap_or_else(|_| "1min".to_string())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let depth: u32 = env::var("ORDERBOOK_DEPTH")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .context("ORDERBOOK_DEPTH must be a number")?;

    let client = match StreamingClient::connect(&config, Arc::new(TracingLogger)).await {
        Ok(client) => Arc::new(client),
        Err(e) if e.is_auth() => {
            error!(error = %e, "Token rejected");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    client.metrics().register(prometheus::default_registry())?;
    info!(endpoint = %client.endpoint(), "Connected");

    for (i, figi) in figis.iter().enumerate() {
        client
            .subscribe_candle(figi, interval, &format!("candle-{}", i))
            .await?;
        client
            .subscribe_orderbook(figi, depth, &format!("orderbook-{}", i))
            .await?;
        client
            .subscribe_instrument_info(figi, &format!("info-{}", i))
            .await?;
        info!(figi = %figi, interval = %interval, depth, "Subscribed");
    }

    let closer = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            if let Err(e) = closer.close().await {
                warn!(error = %e, "Close failed");
            }
        }
    });

    let result = client.run_read_loop(log_event).await;

    print!("{}", metrics());

    match result {
        Ok(()) | Err(StreamingError::Closed) => Ok(()),
        Err(e) => {
            error!(error = %e, "Read loop terminated");
            Err(e.into())
        }
    }
}

fn log_event(event: StreamEvent) -> anyhow::Result<()> {
    match &event {
        StreamEvent::Candle(e) => info!(
            figi = %e.candle.figi,
            interval = %e.candle.interval,
            open = %e.candle.open,
            close = %e.candle.close,
            volume = %e.candle.volume,
            "Candle"
        ),
        StreamEvent::OrderBook(e) => info!(
            figi = %e.order_book.figi,
            best_bid = ?e.order_book.bids.first().map(|l| l.price),
            best_ask = ?e.order_book.asks.first().map(|l| l.price),
            "Order book"
        ),
        StreamEvent::InstrumentInfo(e) => info!(
            figi = %e.info.figi,
            status = ?e.info.trade_status,
            lot = e.info.lot,
            "Instrument info"
        ),
        StreamEvent::Error(e) => warn!(
            request_id = ?e.error.request_id,
            error = %e.error.error,
            "Server error"
        ),
    }
    Ok(())
}

/// Text exposition of the default registry
fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Can't encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
