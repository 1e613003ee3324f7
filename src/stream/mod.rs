//! Stream Module
//!
//! Auto-reconnecting subscription client. The transport is abstracted
//! behind [`Connector`]; [`WsConnector`] is the WebSocket implementation.
//!
//! Inbound frames are `{ "type": ..., "payload": ... }` envelopes and are
//! republished on the [`crate::dispatcher::Dispatcher`] under their `type`.
//! Connection lifecycle is published under the names in [`events`].

mod client;
mod native;
mod policy;
mod transport;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParseError, StreamError};

pub use client::{StreamClient, StreamClientBuilder, SubscriptionStatus};
pub use native::WsConnector;
pub use policy::{ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use transport::{Connection, Connector, TransportEvent, TransportSink};

/// Dispatcher event types emitted by the stream client itself.
pub mod events {
    /// Prefix shared by every lifecycle event. Inbound frames may not use it.
    pub const RESERVED_PREFIX: &str = "stream.";

    /// `{"state": "<connection state>"}` on every transition
    pub const STATE: &str = "stream.state";
    /// `{"reason": ...}` when the transport reports a failure
    pub const ERROR: &str = "stream.error";
    /// `{"attempt": n, "delay_ms": ms}` when a reconnect is scheduled
    pub const RECONNECT_SCHEDULED: &str = "stream.reconnect_scheduled";
    /// `{"reason": ..., "frame": ...}` when an inbound frame is dropped
    pub const PARSE_ERROR: &str = "stream.parse_error";
    /// `{"attempts": n}` when the reconnect policy gives up
    pub const GAVE_UP: &str = "stream.gave_up";

    /// True for event types only the client itself may publish.
    pub fn is_reserved(kind: &str) -> bool {
        kind.starts_with(RESERVED_PREFIX)
    }
}

// == Connection State ==
/// Lifecycle of a subscription's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never started
    Idle,
    /// Transport open requested, not yet confirmed
    Connecting,
    /// Transport open, frames flowing
    Open,
    /// Close requested by the client
    Closing,
    /// Reconnect policy gave up; `start()` re-arms
    Closed,
    /// Waiting for the retry timer
    Backoff,
    /// Stopped by the caller; no reconnection until `start()`
    Stopped,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Backoff => "backoff",
            ConnectionState::Stopped => "stopped",
        }
    }

    /// True while the client is trying to hold a connection.
    pub fn is_armed(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Backoff
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Envelope ==
/// Tagged frame exchanged with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parses an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(|e| ParseError {
            reason: e.to_string(),
        })?;
        if envelope.kind.trim().is_empty() {
            return Err(ParseError {
                reason: "empty frame type".to_string(),
            });
        }
        if events::is_reserved(&envelope.kind) {
            return Err(ParseError {
                reason: format!("reserved frame type: {}", envelope.kind),
            });
        }
        Ok(envelope)
    }

    /// Serializes to a text frame.
    pub fn encode(&self) -> Result<String, StreamError> {
        serde_json::to_string(self).map_err(|e| StreamError::Encode(e.to_string()))
    }
}
