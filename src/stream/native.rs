//! WebSocket transport on tokio-tungstenite.
//!
//! Each [`Connector::open`] spawns one task that owns the socket. Outbound
//! frames travel over an mpsc channel; inbound events go to the sink.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::stream::transport::{Connection, Connector, TransportSink};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// == WebSocket Connector ==
/// Opens `ws://` / `wss://` connections. Requires a running tokio runtime.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn open(&self, address: &str, sink: TransportSink) -> Box<dyn Connection> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(
            address.to_string(),
            self.connect_timeout,
            sink,
            rx,
        ));
        Box::new(WsConnection { tx })
    }
}

enum Outbound {
    Text(String),
    Close,
}

// == WebSocket Connection ==
/// Outbound handle. Dropping it closes the socket silently.
struct WsConnection {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection for WsConnection {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Io("connection task has exited".to_string()))
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

// == Connection Task ==
async fn run_connection(
    address: String,
    connect_timeout: Duration,
    sink: TransportSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let connected = tokio::time::timeout(connect_timeout, connect_async(address.as_str())).await;
    let ws_stream = match connected {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            sink.failed(TransportError::ConnectFailed(e.to_string()));
            return;
        }
        Err(_) => {
            sink.failed(TransportError::ConnectFailed(format!(
                "timed out after {}ms",
                connect_timeout.as_millis()
            )));
            return;
        }
    };

    debug!(address = %address, "websocket connected");
    sink.opened();

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text: &str = text.as_ref();
                    sink.frame(text);
                }
                Some(Ok(Message::Ping(data))) => {
                    if !write_or_fail(&mut write, Message::Pong(data), &sink).await {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = extract_close(frame.as_ref());
                    sink.closed(Some(code), reason);
                    return;
                }
                // Binary, Pong, raw frames
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.failed(TransportError::Io(e.to_string()));
                    return;
                }
                None => {
                    sink.closed(None, "stream ended");
                    return;
                }
            },

            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if !write_or_fail(&mut write, Message::Text(text.into()), &sink).await {
                        return;
                    }
                }
                // Explicit close or handle dropped; the client already moved on.
                Some(Outbound::Close) | None => {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closing".into(),
                        })))
                        .await;
                    debug!(address = %address, "websocket closed by client");
                    return;
                }
            },
        }
    }
}

/// Writes one message. Returns false, after reporting the failure to the
/// sink, when the write fails.
async fn write_or_fail<S>(write: &mut S, msg: Message, sink: &TransportSink) -> bool
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match write.send(msg).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "websocket write failed");
            sink.failed(TransportError::Io(e.to_string()));
            false
        }
    }
}

/// Close code and reason from an optional close frame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "no close frame".to_string()),
    }
}
