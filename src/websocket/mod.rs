//! WebSocket connection to the streaming feed

mod client;
mod keepalive;

use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

pub use client::{EventHandler, StreamingClient};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half, shared behind the writer lock
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Read half, used only by the read loop
pub(crate) type WsSource = SplitStream<WsStream>;
