//! Ping/pong keepalive
//!
//! The read side keeps a deadline that every pong pushes forward; the write
//! side runs a ticker task that pings the peer until the connection closes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::WsSink;
use crate::config::KeepaliveConfig;
use crate::logger::Logger;
use crate::metrics::StreamMetrics;

/// Bound for control frame writes (pong, ping, close), including the wait for
/// the writer lock
pub(crate) const CONTROL_WRITE_WAIT: Duration = Duration::from_secs(1);

/// Read deadline state, owned by the reader
#[derive(Debug)]
pub(crate) struct ReadDeadline {
    pong_wait: Option<Duration>,
    expires_at: Option<Instant>,
}

impl ReadDeadline {
    /// Arms the deadline at `now + pong_wait` when keepalive is enabled.
    pub(crate) fn activate(config: &KeepaliveConfig) -> Self {
        let pong_wait = config.is_enabled().then(|| config.pong_wait());
        Self {
            pong_wait,
            expires_at: pong_wait.map(|wait| Instant::now() + wait),
        }
    }

    /// Pong handler
    pub(crate) fn reset(&mut self) {
        if let Some(wait) = self.pong_wait {
            self.expires_at = Some(Instant::now() + wait);
        }
    }

    pub(crate) fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub(crate) fn pong_wait(&self) -> Option<Duration> {
        self.pong_wait
    }
}

/// Failures a ping handler may swallow: the transport is already closing or
/// the send failed transiently.
pub(crate) fn is_benign_write_error(err: &WsError) -> bool {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => true,
        WsError::Io(io_err) => matches!(
            io_err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

/// Resolves once `close()` has been called or the client is gone.
pub(crate) async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *shutdown.borrow_and_update();
        if is_closed {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Spawn the periodic ping task
pub(crate) fn spawn_pinger(
    writer: Arc<Mutex<Option<WsSink>>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    logger: Arc<dyn Logger>,
    metrics: StreamMetrics,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = closed(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let ping = async {
                        match writer.lock().await.as_mut() {
                            Some(sink) => sink.send(Message::Ping(Vec::new())).await,
                            None => Err(WsError::AlreadyClosed),
                        }
                    };
                    match timeout(CONTROL_WRITE_WAIT, ping).await {
                        Ok(Ok(())) => metrics.pings_sent.inc(),
                        Ok(Err(e)) => {
                            // The read loop reports the broken transport.
                            logger.log(format_args!("Can't send ping: {}", e));
                            break;
                        }
                        Err(_) => logger.log(format_args!(
                            "Ping write did not complete within {:?}",
                            CONTROL_WRITE_WAIT
                        )),
                    }
                }
            }
        }
    })
}
