//! Shared fixtures for stream client tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use stream_cache::error::TransportError;
use stream_cache::stream::{Connection, Connector, TransportSink};
use stream_cache::Dispatcher;

// == Mock Connector ==
/// Records every open and lets the test drive each connection's events.
#[derive(Clone, Default)]
pub struct MockConnector {
    opened: Arc<Mutex<Vec<MockLink>>>,
}

#[derive(Clone)]
struct MockLink {
    address: String,
    sink: TransportSink,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn address(&self, index: usize) -> String {
        self.link(index).address
    }

    /// Sink handed to the `index`-th connection attempt.
    pub fn sink(&self, index: usize) -> TransportSink {
        self.link(index).sink
    }

    pub fn latest(&self) -> TransportSink {
        let count = self.open_count();
        assert!(count > 0, "no connection was opened");
        self.sink(count - 1)
    }

    /// Text frames the client sent on the `index`-th connection.
    pub fn sent(&self, index: usize) -> Vec<String> {
        self.link(index).sent.lock().unwrap().clone()
    }

    pub fn was_closed(&self, index: usize) -> bool {
        self.link(index).closed.load(Ordering::SeqCst)
    }

    fn link(&self, index: usize) -> MockLink {
        self.opened.lock().unwrap()[index].clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, address: &str, sink: TransportSink) -> Box<dyn Connection> {
        let link = MockLink {
            address: address.to_string(),
            sink,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let conn = MockConnection {
            sent: Arc::clone(&link.sent),
            closed: Arc::clone(&link.closed),
        };
        self.opened.lock().unwrap().push(link);
        Box::new(conn)
    }
}

struct MockConnection {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl Connection for MockConnection {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Io("connection closed".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// == Event Recorder ==
/// Captures every payload published for the given event types, in order.
pub fn record(dispatcher: &Dispatcher, event_types: &[&str]) -> Arc<Mutex<Vec<(String, Value)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event_type in event_types {
        let log = Arc::clone(&log);
        let name = event_type.to_string();
        dispatcher.subscribe(*event_type, move |payload: &Value| {
            log.lock().unwrap().push((name.clone(), payload.clone()));
            Ok(())
        });
    }
    log
}

/// States published on `stream.state`, in order.
pub fn states(log: &Arc<Mutex<Vec<(String, Value)>>>) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(name, _)| name == "stream.state")
        .filter_map(|(_, payload)| payload["state"].as_str().map(str::to_string))
        .collect()
}
