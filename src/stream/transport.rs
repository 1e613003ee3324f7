//! Transport seams between the stream client and a duplex text channel.

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

// == Transport Event ==
/// What a transport reports back about one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { code: Option<u16>, reason: String },
    Failed(TransportError),
}

// == Transport Sink ==
/// Where a connection delivers its events, in order.
///
/// Each sink is bound to one connection attempt; events from an attempt
/// the client has moved past are ignored.
#[derive(Clone)]
pub struct TransportSink {
    deliver: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportSink {
    pub fn new(deliver: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn send(&self, event: TransportEvent) {
        (self.deliver)(event)
    }

    pub fn opened(&self) {
        self.send(TransportEvent::Opened)
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.send(TransportEvent::Frame(text.into()))
    }

    pub fn closed(&self, code: Option<u16>, reason: impl Into<String>) {
        self.send(TransportEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn failed(&self, error: TransportError) {
        self.send(TransportEvent::Failed(error))
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

// == Connection ==
/// Outbound half of an open (or opening) connection.
pub trait Connection: Send + Sync {
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Requests a graceful close. The transport should report nothing afterwards.
    fn close(&self);
}

// == Connector ==
/// Opens connections. Events may be delivered on any thread, including
/// before `open` returns.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, address: &str, sink: TransportSink) -> Box<dyn Connection>;
}
