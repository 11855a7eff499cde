//! Streaming client
//!
//! Owns the authenticated connection, the subscription write path and the
//! read loop that turns frames into [`StreamEvent`]s.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        protocol::Message,
        Error as WsError,
    },
};

use super::keepalive::{self, ReadDeadline, CONTROL_WRITE_WAIT};
use super::{WsSink, WsSource};
use crate::config::{KeepaliveConfig, StreamingConfig};
use crate::error::{DecodeError, Result, StreamingError};
use crate::logger::{Logger, TracingLogger};
use crate::metrics::StreamMetrics;
use crate::parser::{CandleInterval, StreamEvent};
use crate::subscription::{Action, SubscriptionRequest};

/// Receives every decoded event. Returning an error stops the read loop.
pub trait EventHandler {
    fn handle(&mut self, event: StreamEvent) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: FnMut(StreamEvent) -> anyhow::Result<()>,
{
    fn handle(&mut self, event: StreamEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Read half plus the deadline the pong handler maintains
struct Reader {
    stream: WsSource,
    deadline: ReadDeadline,
}

/// One authenticated streaming connection
///
/// Subscriptions may be sent from any task while another task runs
/// [`run_read_loop`](Self::run_read_loop); all writes go through one lock.
/// Both halves are taken out and dropped on close, which releases the socket.
pub struct StreamingClient {
    endpoint: String,
    keepalive: KeepaliveConfig,
    writer: Arc<Mutex<Option<WsSink>>>,
    reader: Mutex<Option<Reader>>,
    shutdown: watch::Sender<bool>,
    pinger: Mutex<Option<JoinHandle<()>>>,
    logger: Arc<dyn Logger>,
    metrics: StreamMetrics,
}

impl StreamingClient {
    /// Connect with the default endpoint, keepalive disabled, logging to `tracing`
    pub async fn connect_default(token: &str) -> Result<Self> {
        Self::connect(&StreamingConfig::new(token), Arc::new(TracingLogger)).await
    }

    /// Perform the authenticated handshake. Exactly one attempt is made.
    pub async fn connect(config: &StreamingConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let endpoint = config.endpoint.clone();

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|source| StreamingError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| StreamingError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let handshake = timeout(config.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| StreamingError::HandshakeTimeout {
                endpoint: endpoint.clone(),
                timeout: config.handshake_timeout,
            })?;

        let (ws_stream, _response) = handshake.map_err(|e| map_handshake_error(&endpoint, e))?;
        let (sink, stream) = ws_stream.split();

        let metrics = StreamMetrics::new()?;
        let writer = Arc::new(Mutex::new(Some(sink)));
        let (shutdown, _) = watch::channel(false);

        let pinger = if config.keepalive.is_enabled() {
            Some(keepalive::spawn_pinger(
                writer.clone(),
                config.keepalive.ping_period(),
                shutdown.subscribe(),
                logger.clone(),
                metrics.clone(),
            ))
        } else {
            None
        };

        Ok(Self {
            endpoint,
            keepalive: config.keepalive,
            writer,
            reader: Mutex::new(Some(Reader {
                stream,
                deadline: ReadDeadline::activate(&config.keepalive),
            })),
            shutdown,
            pinger: Mutex::new(pinger),
            logger,
            metrics,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn keepalive(&self) -> &KeepaliveConfig {
        &self.keepalive
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn subscribe_candle(
        &self,
        figi: &str,
        interval: CandleInterval,
        request_id: &str,
    ) -> Result<()> {
        self.send(&SubscriptionRequest::candle(Action::Subscribe, figi, interval, request_id))
            .await
    }

    pub async fn unsubscribe_candle(
        &self,
        figi: &str,
        interval: CandleInterval,
        request_id: &str,
    ) -> Result<()> {
        self.send(&SubscriptionRequest::candle(Action::Unsubscribe, figi, interval, request_id))
            .await
    }

    /// Fails with [`StreamingError::InvalidDepth`] before writing anything
    /// unless `1 <= depth <= MAX_ORDERBOOK_DEPTH`.
    pub async fn subscribe_orderbook(&self, figi: &str, depth: u32, request_id: &str) -> Result<()> {
        self.send(&SubscriptionRequest::orderbook(Action::Subscribe, figi, depth, request_id))
            .await
    }

    pub async fn unsubscribe_orderbook(
        &self,
        figi: &str,
        depth: u32,
        request_id: &str,
    ) -> Result<()> {
        self.send(&SubscriptionRequest::orderbook(Action::Unsubscribe, figi, depth, request_id))
            .await
    }

    pub async fn subscribe_instrument_info(&self, figi: &str, request_id: &str) -> Result<()> {
        self.send(&SubscriptionRequest::instrument_info(Action::Subscribe, figi, request_id))
            .await
    }

    pub async fn unsubscribe_instrument_info(&self, figi: &str, request_id: &str) -> Result<()> {
        self.send(&SubscriptionRequest::instrument_info(Action::Unsubscribe, figi, request_id))
            .await
    }

    /// Validate, encode and write one control frame
    ///
    /// A write still pending when [`close`](Self::close) is called gives up
    /// with [`StreamingError::Closed`] and releases the writer.
    pub async fn send(&self, request: &SubscriptionRequest) -> Result<()> {
        let frame = request.encode()?;
        let event = request.event_name();
        let mut shutdown = self.shutdown.subscribe();

        let write = async {
            let mut writer = self.writer.lock().await;
            let sink = writer.as_mut().ok_or(StreamingError::Closed)?;
            sink.send(Message::Text(frame))
                .await
                .map_err(|source| StreamingError::Write {
                    action: format!("send {}", event),
                    source,
                })
        };

        tokio::select! {
            _ = keepalive::closed(&mut shutdown) => return Err(StreamingError::Closed),
            result = write => result?,
        }

        self.metrics
            .requests
            .with_label_values(&[event.as_str()])
            .inc();
        Ok(())
    }

    /// Read frames and hand decoded events to `handler` until something fatal
    /// happens.
    ///
    /// Malformed and unknown frames are logged and skipped. Read failures,
    /// keepalive expiry, [`close`](Self::close) and handler errors end the loop;
    /// the handler's error is returned as [`StreamingError::Handler`]. The
    /// handler runs inline, so a slow handler slows down reading.
    pub async fn run_read_loop<H: EventHandler>(&self, mut handler: H) -> Result<()> {
        let mut slot = self.reader.lock().await;
        let reader = slot.as_mut().ok_or(StreamingError::Closed)?;

        let result = self.read_frames(reader, &mut handler).await;
        if matches!(result, Err(StreamingError::Closed)) {
            // close() could not take the read half while we held it.
            *slot = None;
        }
        result
    }

    async fn read_frames<H: EventHandler>(
        &self,
        reader: &mut Reader,
        handler: &mut H,
    ) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let message = self.next_message(reader, &mut shutdown).await?;

            match message {
                Message::Text(text) => self.dispatch(text.as_bytes(), handler)?,
                Message::Binary(data) => self.dispatch(&data, handler)?,
                Message::Ping(payload) => self.reply_pong(payload).await?,
                Message::Pong(_) => reader.deadline.reset(),
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(StreamingError::PeerClosed(reason));
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn next_message(
        &self,
        reader: &mut Reader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Message> {
        let expires_at = reader.deadline.expires_at();
        let pong_wait = reader.deadline.pong_wait().unwrap_or_default();
        let next = reader.stream.next();

        let read = async {
            match expires_at {
                Some(at) => timeout_at(at, next)
                    .await
                    .map_err(|_| StreamingError::KeepaliveTimeout(pong_wait)),
                None => Ok(next.await),
            }
        };

        tokio::select! {
            _ = keepalive::closed(shutdown) => Err(StreamingError::Closed),
            result = read => match result? {
                Some(Ok(message)) => Ok(message),
                Some(Err(e)) => Err(StreamingError::Read(e)),
                None => Err(StreamingError::PeerClosed("stream ended".to_string())),
            },
        }
    }

    /// Decode one data frame and deliver it; only handler errors escape.
    fn dispatch<H: EventHandler>(&self, frame: &[u8], handler: &mut H) -> Result<()> {
        match StreamEvent::decode(frame) {
            Ok(event) => {
                self.metrics
                    .frames
                    .with_label_values(&[event.kind().as_str()])
                    .inc();
                handler.handle(event).map_err(StreamingError::Handler)
            }
            Err(err) => {
                let reason = match &err {
                    DecodeError::Envelope(_) => "envelope",
                    DecodeError::Payload { .. } => "payload",
                    DecodeError::Unrecognized(_) => "unknown",
                };
                self.metrics.dropped_frames.with_label_values(&[reason]).inc();
                self.logger.log(format_args!(
                    "Dropping frame: {}: {}",
                    err,
                    String::from_utf8_lossy(frame)
                ));
                Ok(())
            }
        }
    }

    /// Ping handler: answer with the same payload
    async fn reply_pong(&self, payload: Vec<u8>) -> Result<()> {
        let pong = async {
            match self.writer.lock().await.as_mut() {
                Some(sink) => sink.send(Message::Pong(payload)).await,
                None => Err(WsError::AlreadyClosed),
            }
        };
        match timeout(CONTROL_WRITE_WAIT, pong).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if keepalive::is_benign_write_error(&e) => {
                self.logger.log(format_args!("Ignoring pong write failure: {}", e));
                Ok(())
            }
            Ok(Err(e)) => Err(StreamingError::Write {
                action: "send pong".to_string(),
                source: e,
            }),
            Err(_) => {
                self.logger.log(format_args!(
                    "Pong write did not complete within {:?}",
                    CONTROL_WRITE_WAIT
                ));
                Ok(())
            }
        }
    }

    /// Stop the keepalive task and close the transport.
    ///
    /// Safe to call while another task is inside
    /// [`run_read_loop`](Self::run_read_loop): that call returns
    /// [`StreamingError::Closed`]. Pending writes are abandoned, and the close
    /// frame gets at most one second including the wait for the writer.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let already_closed = self.shutdown.send_replace(true);

        if let Some(pinger) = self.pinger.lock().await.take() {
            pinger.abort();
        }

        if already_closed {
            return Ok(());
        }

        let closing = async {
            let sink = self.writer.lock().await.take();
            match sink {
                Some(mut sink) => sink.close().await,
                None => Ok(()),
            }
        };
        let result = match timeout(CONTROL_WRITE_WAIT, closing).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
            Ok(Err(e)) => Err(StreamingError::Write {
                action: "close connection".to_string(),
                source: e,
            }),
            Err(_) => {
                self.logger.log(format_args!(
                    "Close frame to {} not flushed within {:?}",
                    self.endpoint, CONTROL_WRITE_WAIT
                ));
                Ok(())
            }
        };

        // A running read loop drops its half itself once it sees the signal.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        result
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(pinger) = self.pinger.get_mut().take() {
            pinger.abort();
        }
    }
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("endpoint", &self.endpoint)
            .field("keepalive", &self.keepalive)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 403 and 401 become auth errors, anything else keeps its cause
fn map_handshake_error(endpoint: &str, err: WsError) -> StreamingError {
    if let WsError::Http(response) = &err {
        match response.status() {
            StatusCode::FORBIDDEN => {
                return StreamingError::Forbidden {
                    endpoint: endpoint.to_string(),
                }
            }
            StatusCode::UNAUTHORIZED => {
                return StreamingError::Unauthorized {
                    endpoint: endpoint.to_string(),
                }
            }
            _ => {}
        }
    }
    StreamingError::Connect {
        endpoint: endpoint.to_string(),
        source: err,
    }
}
