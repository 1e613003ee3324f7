//! Stream client state machine.
//!
//! All mutable state sits behind one mutex. Transitions run under the lock
//! and collect their side effects into [`Effects`]; the effects (dispatcher
//! publishes, transport calls, timer scheduling) run after it is released.
//!
//! Every connection attempt gets a fresh epoch. Transport callbacks and
//! retry timers carry the epoch they were created under and are ignored
//! once the client has moved past it, so a stopped client stays stopped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::StreamError;
use crate::stream::native::WsConnector;
use crate::stream::policy::{ExponentialBackoff, ReconnectPolicy};
use crate::stream::transport::{Connection, Connector, TransportEvent, TransportSink};
use crate::stream::{events, ConnectionState, Envelope};
use crate::timer::{Timer, TimerHandle, TokioTimer};

// == Subscription ==
/// Connection record owned by the client.
#[derive(Debug)]
struct Subscription {
    endpoint_address: String,
    state: ConnectionState,
    last_error: Option<String>,
    retry_count: u32,
    retry_handle: Option<TimerHandle>,
}

/// Read-only view of the subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub endpoint_address: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub retry_pending: bool,
}

struct ClientState {
    subscription: Subscription,
    epoch: u64,
    connection: Option<Arc<dyn Connection>>,
    tracked: Vec<Envelope>,
}

struct ClientInner {
    connector: Box<dyn Connector>,
    policy: Box<dyn ReconnectPolicy>,
    timer: Box<dyn Timer>,
    dispatcher: Dispatcher,
    state: Mutex<ClientState>,
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Effects ==
/// Work deferred until the state lock is released.
#[derive(Default)]
struct Effects {
    events: Vec<(String, Value)>,
    close: Option<Arc<dyn Connection>>,
    open: Option<u64>,
    schedule: Option<(u64, Duration)>,
    send: Option<(Arc<dyn Connection>, Vec<String>)>,
}

impl Effects {
    fn publish(&mut self, event_type: impl Into<String>, payload: Value) {
        self.events.push((event_type.into(), payload));
    }
}

fn set_state(st: &mut ClientState, next: ConnectionState, fx: &mut Effects) {
    let prev = st.subscription.state;
    if prev == next {
        return;
    }
    st.subscription.state = next;
    debug!(from = %prev, to = %next, "stream state changed");
    fx.publish(events::STATE, json!({ "state": next }));
}

// == Stream Client ==
/// Auto-reconnecting stream subscription.
///
/// Cloning yields another handle to the same client.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

/// Builder for [`StreamClient`]. Defaults to the WebSocket connector,
/// exponential backoff, and the tokio timer.
pub struct StreamClientBuilder {
    address: String,
    dispatcher: Dispatcher,
    connector: Box<dyn Connector>,
    policy: Box<dyn ReconnectPolicy>,
    timer: Box<dyn Timer>,
}

impl StreamClientBuilder {
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Box::new(connector);
        self
    }

    pub fn policy(mut self, policy: impl ReconnectPolicy) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn timer(mut self, timer: impl Timer) -> Self {
        self.timer = Box::new(timer);
        self
    }

    pub fn build(self) -> StreamClient {
        let subscription = Subscription {
            endpoint_address: self.address,
            state: ConnectionState::Idle,
            last_error: None,
            retry_count: 0,
            retry_handle: None,
        };

        StreamClient {
            inner: Arc::new(ClientInner {
                connector: self.connector,
                policy: self.policy,
                timer: self.timer,
                dispatcher: self.dispatcher,
                state: Mutex::new(ClientState {
                    subscription,
                    epoch: 0,
                    connection: None,
                    tracked: Vec::new(),
                }),
            }),
        }
    }
}

impl StreamClient {
    pub fn builder(address: impl Into<String>, dispatcher: Dispatcher) -> StreamClientBuilder {
        StreamClientBuilder {
            address: address.into(),
            dispatcher,
            connector: Box::new(WsConnector::default()),
            policy: Box::new(ExponentialBackoff::default()),
            timer: Box::new(TokioTimer),
        }
    }

    /// WebSocket client for `STREAM_URL`, or None when it is not configured.
    pub fn from_config(config: &Config, dispatcher: Dispatcher) -> Option<Self> {
        let address = config.stream_url.clone()?;
        Some(
            Self::builder(address, dispatcher)
                .policy(ExponentialBackoff::from_config(config))
                .build(),
        )
    }

    // == Start ==
    /// Begins connecting. No-op unless Idle, Stopped, or Closed.
    pub fn start(&self) {
        let mut fx = Effects::default();
        {
            let mut st = self.inner.lock();
            match st.subscription.state {
                ConnectionState::Idle | ConnectionState::Stopped | ConnectionState::Closed => {}
                state => {
                    debug!(state = %state, "start ignored, client already running");
                    return;
                }
            }

            st.epoch += 1;
            st.subscription.retry_count = 0;
            info!(address = %st.subscription.endpoint_address, "starting stream client");
            set_state(&mut st, ConnectionState::Connecting, &mut fx);
            fx.open = Some(st.epoch);
        }
        run_effects(&self.inner, fx);
    }

    // == Stop ==
    /// Cancels any pending retry, closes the transport, and moves to
    /// Stopped. Idempotent.
    pub fn stop(&self) {
        let mut fx = Effects::default();
        {
            let mut st = self.inner.lock();
            if st.subscription.state == ConnectionState::Stopped {
                return;
            }

            st.epoch += 1;
            if let Some(handle) = st.subscription.retry_handle.take() {
                handle.cancel();
            }
            if let Some(conn) = st.connection.take() {
                if st.subscription.state == ConnectionState::Open {
                    set_state(&mut st, ConnectionState::Closing, &mut fx);
                }
                fx.close = Some(conn);
            }
            set_state(&mut st, ConnectionState::Stopped, &mut fx);
            info!(address = %st.subscription.endpoint_address, "stream client stopped");
        }
        run_effects(&self.inner, fx);
    }

    // == Send ==
    /// Sends one envelope on the open connection.
    pub fn send(&self, kind: impl Into<String>, payload: Value) -> Result<(), StreamError> {
        let text = Envelope::new(kind, payload).encode()?;
        let conn = {
            let st = self.inner.lock();
            match (&st.connection, st.subscription.state) {
                (Some(conn), ConnectionState::Open) => Arc::clone(conn),
                _ => return Err(StreamError::NotConnected),
            }
        };
        conn.send(text)?;
        Ok(())
    }

    /// Remembers an outbound subscription message. It is sent now if the
    /// connection is open, and again after every reconnect.
    pub fn track_subscription(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<(), StreamError> {
        let envelope = Envelope::new(kind, payload);
        let text = envelope.encode()?;

        let conn = {
            let mut st = self.inner.lock();
            if !st.tracked.contains(&envelope) {
                st.tracked.push(envelope);
            }
            match (&st.connection, st.subscription.state) {
                (Some(conn), ConnectionState::Open) => Some(Arc::clone(conn)),
                _ => None,
            }
        };

        if let Some(conn) = conn {
            if let Err(e) = conn.send(text) {
                warn!(error = %e, "failed to send subscription, will replay on reconnect");
            }
        }
        Ok(())
    }

    /// Forgets a tracked subscription. Returns whether it was tracked.
    pub fn untrack_subscription(&self, kind: &str, payload: &Value) -> bool {
        let mut st = self.inner.lock();
        let before = st.tracked.len();
        st.tracked
            .retain(|env| !(env.kind == kind && &env.payload == payload));
        st.tracked.len() != before
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().subscription.state
    }

    pub fn status(&self) -> SubscriptionStatus {
        let st = self.inner.lock();
        let sub = &st.subscription;
        SubscriptionStatus {
            endpoint_address: sub.endpoint_address.clone(),
            state: sub.state,
            last_error: sub.last_error.clone(),
            retry_count: sub.retry_count,
            retry_pending: sub.retry_handle.is_some(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("status", &self.status())
            .finish()
    }
}

// == Effect Runner ==
fn run_effects(inner: &Arc<ClientInner>, fx: Effects) {
    for (event_type, payload) in &fx.events {
        inner.dispatcher.publish(event_type, payload);
    }
    if let Some(conn) = fx.close {
        conn.close();
    }
    if let Some(epoch) = fx.open {
        open_connection(inner, epoch);
    }
    if let Some((epoch, delay)) = fx.schedule {
        schedule_retry(inner, epoch, delay);
    }
    if let Some((conn, frames)) = fx.send {
        for text in frames {
            if let Err(e) = conn.send(text) {
                warn!(error = %e, "failed to replay subscription");
                break;
            }
        }
    }
}

fn open_connection(inner: &Arc<ClientInner>, epoch: u64) {
    let address = {
        let st = inner.lock();
        if st.epoch != epoch || st.subscription.state != ConnectionState::Connecting {
            return;
        }
        st.subscription.endpoint_address.clone()
    };

    let weak: Weak<ClientInner> = Arc::downgrade(inner);
    let sink = TransportSink::new(move |event| {
        if let Some(inner) = weak.upgrade() {
            handle_event(&inner, epoch, event);
        }
    });
    let conn: Arc<dyn Connection> = Arc::from(inner.connector.open(&address, sink));

    let mut fx = Effects::default();
    {
        let mut st = inner.lock();
        let current = st.epoch == epoch
            && st.connection.is_none()
            && matches!(
                st.subscription.state,
                ConnectionState::Connecting | ConnectionState::Open
            );

        if !current {
            fx.close = Some(conn);
        } else {
            st.connection = Some(Arc::clone(&conn));
            // Opened arrived before the handle was stored
            if st.subscription.state == ConnectionState::Open {
                fx.send = replay_frames(&st, conn);
            }
        }
    }
    run_effects(inner, fx);
}

fn schedule_retry(inner: &Arc<ClientInner>, epoch: u64, delay: Duration) {
    let weak = Arc::downgrade(inner);
    let handle = inner.timer.schedule(
        delay,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                retry(&inner, epoch);
            }
        }),
    );

    let mut st = inner.lock();
    let current = st.epoch == epoch
        && st.subscription.state == ConnectionState::Backoff
        && st.subscription.retry_handle.is_none();
    if current {
        st.subscription.retry_handle = Some(handle);
    } else {
        handle.cancel();
    }
}

fn retry(inner: &Arc<ClientInner>, epoch: u64) {
    let mut fx = Effects::default();
    {
        let mut st = inner.lock();
        if st.epoch != epoch || st.subscription.state != ConnectionState::Backoff {
            debug!(epoch, "stale reconnect timer ignored");
            return;
        }

        st.subscription.retry_handle = None;
        st.epoch += 1;
        info!(
            address = %st.subscription.endpoint_address,
            attempt = st.subscription.retry_count,
            "reconnecting stream"
        );
        set_state(&mut st, ConnectionState::Connecting, &mut fx);
        fx.open = Some(st.epoch);
    }
    run_effects(inner, fx);
}

// == Transport Events ==
fn handle_event(inner: &Arc<ClientInner>, epoch: u64, event: TransportEvent) {
    let mut fx = Effects::default();
    {
        let mut st = inner.lock();
        if st.epoch != epoch {
            debug!(epoch, current = st.epoch, "stale transport event ignored");
            return;
        }

        match event {
            TransportEvent::Opened => on_opened(&mut st, &mut fx),
            TransportEvent::Frame(text) => on_frame(&st, &text, &mut fx),
            TransportEvent::Closed { code, reason } => {
                let reason = match code {
                    Some(code) => format!("closed with code {code}: {reason}"),
                    None => format!("closed: {reason}"),
                };
                warn!(reason = %reason, "stream connection closed");
                on_disconnect(&mut st, reason, &mut fx, inner.policy.as_ref());
            }
            TransportEvent::Failed(e) => {
                let reason = e.to_string();
                error!(error = %reason, "stream transport error");
                fx.publish(events::ERROR, json!({ "reason": reason }));
                on_disconnect(&mut st, reason, &mut fx, inner.policy.as_ref());
            }
        }
    }
    run_effects(inner, fx);
}

fn on_opened(st: &mut ClientState, fx: &mut Effects) {
    if st.subscription.state != ConnectionState::Connecting {
        return;
    }

    st.subscription.retry_count = 0;
    info!(address = %st.subscription.endpoint_address, "stream connection open");
    set_state(st, ConnectionState::Open, fx);

    if let Some(conn) = st.connection.clone() {
        fx.send = replay_frames(st, conn);
    }
}

fn on_frame(st: &ClientState, text: &str, fx: &mut Effects) {
    if st.subscription.state != ConnectionState::Open {
        debug!(state = %st.subscription.state, "frame outside open state dropped");
        return;
    }

    match Envelope::parse(text) {
        Ok(envelope) => {
            debug!(kind = %envelope.kind, "stream frame received");
            fx.publish(envelope.kind, envelope.payload);
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            fx.publish(
                events::PARSE_ERROR,
                json!({ "reason": e.reason, "frame": text }),
            );
        }
    }
}

fn on_disconnect(
    st: &mut ClientState,
    reason: String,
    fx: &mut Effects,
    policy: &dyn ReconnectPolicy,
) {
    if !matches!(
        st.subscription.state,
        ConnectionState::Connecting | ConnectionState::Open
    ) {
        return;
    }

    st.connection = None;
    st.subscription.last_error = Some(reason);

    let attempt = st.subscription.retry_count;
    match policy.next_delay(attempt) {
        Some(delay) => {
            st.subscription.retry_count += 1;
            set_state(st, ConnectionState::Backoff, fx);
            info!(
                attempt = st.subscription.retry_count,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            fx.publish(
                events::RECONNECT_SCHEDULED,
                json!({
                    "attempt": st.subscription.retry_count,
                    "delay_ms": delay.as_millis() as u64,
                }),
            );
            fx.schedule = Some((st.epoch, delay));
        }
        None => {
            warn!(attempts = attempt, "reconnect policy gave up");
            set_state(st, ConnectionState::Closed, fx);
            fx.publish(events::GAVE_UP, json!({ "attempts": attempt }));
        }
    }
}

fn replay_frames(
    st: &ClientState,
    conn: Arc<dyn Connection>,
) -> Option<(Arc<dyn Connection>, Vec<String>)> {
    if st.tracked.is_empty() {
        return None;
    }

    let frames: Vec<String> = st
        .tracked
        .iter()
        .filter_map(|env| env.encode().ok())
        .collect();
    debug!(count = frames.len(), "replaying tracked subscriptions");
    Some((conn, frames))
}
