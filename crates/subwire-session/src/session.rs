//! Connection session: owns the transport, correlates requests and fans
//! server pushes out to subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use subwire_core::{
    Cache, CallbackHandler, Connector, Message, ReadyState, ResourceKey, Transport,
    TransportEvent,
};

use crate::flags::{FlagError, FlagRegistry, ListenerFn};

/// Default number of inbound messages drained per tick. Bounding per-tick
/// work caps the latency a burst of traffic can inject into the host loop.
const DRAIN_BATCH: usize = 10;

/// Default drain tick interval.
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Subscriber/requestor handle, compared by identity.
pub type Handler = Arc<dyn CallbackHandler>;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("message has no type set")]
    MissingType,
    #[error("message has no action set")]
    MissingAction,
    #[error("no url known; call connect first")]
    NoUrl,
    #[error(transparent)]
    Flag(#[from] FlagError),
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport did not reach the closed state")]
    CloseFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// All protocol state lives here, behind one lock: the session is a single
/// logical thread of control. Callbacks are never invoked while the lock is
/// held, so handlers may re-enter the session.
struct Inner {
    url: Option<String>,
    transport: Option<Box<dyn Transport>>,
    state: ConnState,
    /// Identifies the current transport; events from superseded dials are
    /// ignored.
    epoch: u64,
    outbound: VecDeque<Message>,
    inbound: VecDeque<String>,
    cache: Cache,
    flags: FlagRegistry,
    subscribers: HashMap<ResourceKey, Vec<Handler>>,
    pending: HashMap<u64, Handler>,
    message_counter: u64,
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    drain: Option<JoinHandle<()>>,
}

impl Drop for Tasks {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

/// Client-side session over one persistent duplex connection.
///
/// Turns the connection into a request/response and publish/subscribe
/// protocol: callers ask for `(type, id)` resources, outstanding requests
/// are deduplicated, repeat lookups are served from the [`Cache`] and
/// server pushes fan out to every registered [`CallbackHandler`].
///
/// `connect` spawns the transport pump and the inbound drain tick, so the
/// session must be used from within a tokio runtime. No method blocks;
/// replies arrive through handlers on later ticks.
pub struct ConnectionSession {
    inner: Arc<Mutex<Inner>>,
    connector: Arc<dyn Connector>,
    drain_batch: usize,
    drain_interval: Duration,
    tasks: Mutex<Tasks>,
}

impl ConnectionSession {
    /// Create a session dialing through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                url: None,
                transport: None,
                state: ConnState::Disconnected,
                epoch: 0,
                outbound: VecDeque::new(),
                inbound: VecDeque::new(),
                cache: Cache::new(),
                flags: FlagRegistry::new(),
                subscribers: HashMap::new(),
                pending: HashMap::new(),
                message_counter: 0,
            })),
            connector,
            drain_batch: DRAIN_BATCH,
            drain_interval: DRAIN_INTERVAL,
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// Tune the inbound drain: at most `batch` messages per `interval` tick.
    #[must_use]
    pub const fn with_drain(mut self, batch: usize, interval: Duration) -> Self {
        self.drain_batch = batch;
        self.drain_interval = interval;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dial (or re-dial) the transport and (re)start the drain tick.
    ///
    /// Re-entrant by contract: an existing connection is discarded and a
    /// fresh attempt is made, with no guard against duplicate dials.
    ///
    /// # Errors
    /// Returns an error if no url was given here or on a previous call.
    pub fn connect(&self, url: &str) -> Result<(), SessionError> {
        self.connect_inner(Some(url))
    }

    fn connect_inner(&self, url: Option<&str>) -> Result<(), SessionError> {
        let (events, epoch) = {
            let mut inner = self.lock();
            if let Some(url) = url {
                inner.url = Some(url.to_owned());
            }
            let url = inner.url.clone().ok_or(SessionError::NoUrl)?;

            inner.epoch += 1;
            let epoch = inner.epoch;
            let (transport, events) = self.connector.dial(&url);
            inner.transport = Some(transport);
            inner.state = ConnState::Connecting;
            tracing::info!(%url, "connecting");
            (events, epoch)
        };

        self.spawn_pump(events, epoch);
        self.spawn_drain();
        Ok(())
    }

    fn spawn_pump(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>, epoch: u64) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if guard.epoch != epoch {
                    // Superseded by a newer dial.
                    break;
                }
                match event {
                    TransportEvent::Opened => {
                        guard.state = ConnState::Connected;
                        tracing::info!("connected");
                        flush_outbound(&mut guard);
                    }
                    TransportEvent::Message(payload) => {
                        tracing::trace!("got: {payload}");
                        guard.inbound.push_back(payload);
                    }
                    TransportEvent::Error(e) => {
                        tracing::error!("transport error: {e}");
                        guard.state = ConnState::Disconnected;
                    }
                    TransportEvent::Closed => {
                        tracing::info!("disconnected");
                        guard.state = ConnState::Disconnected;
                    }
                }
            }
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tasks.pump.replace(handle) {
            old.abort();
        }
    }

    fn spawn_drain(&self) {
        let inner = Arc::clone(&self.inner);
        let batch = self.drain_batch;
        let period = self.drain_interval;
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let dispatches = {
                    let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    drain_inbound(&mut guard, batch)
                };
                for (handler, msg) in dispatches {
                    handler.callback(&msg);
                }
            }
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tasks.drain.replace(handle) {
            old.abort();
        }
    }

    /// Whether the transport is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().state == ConnState::Connected
    }

    /// Send a message, returning its assigned correlation id.
    ///
    /// Non-blocking: depending on session state the message is written to
    /// the wire, parked behind an inactive gate, buffered until the
    /// transport connects, or suppressed because the answer is already
    /// cached or in flight. In every case the id is assigned exactly once.
    ///
    /// # Errors
    /// Returns an error for a message without type or action, for an
    /// unknown gate name, or when no url is known yet.
    pub fn send(&self, msg: Message) -> Result<u64, SessionError> {
        if msg.resource_type().is_empty() {
            return Err(SessionError::MissingType);
        }
        if msg.action().is_empty() {
            return Err(SessionError::MissingAction);
        }

        let needs_dial = {
            let inner = self.lock();
            match inner.transport.as_ref() {
                None => true,
                Some(t) => t.ready_state() == ReadyState::Closed,
            }
        };
        if needs_dial {
            self.connect_inner(None)?;
        }

        let mut inner = self.lock();
        send_locked(&mut inner, msg)
    }

    /// Subscribe a handler to a resource and request it if necessary.
    ///
    /// A cached value is delivered synchronously without touching the wire;
    /// a request already in flight is simply joined; otherwise the message
    /// is sent and the reply is correlated back to this handler as well as
    /// to the standing subscriber list.
    ///
    /// # Errors
    /// Returns the same errors as [`Self::send`].
    pub fn register(&self, msg: Message, handler: Handler) -> Result<(), SessionError> {
        enum Path {
            Deliver(Message),
            Wait,
            Request,
        }

        let path = {
            let mut inner = self.lock();
            let key = msg.key();
            let entry = inner.subscribers.entry(key.clone()).or_default();
            if !entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                entry.push(Arc::clone(&handler));
            }

            if msg.nocache() {
                Path::Request
            } else if let Some(value) = inner.cache.get(&key) {
                Path::Deliver(value.clone())
            } else if inner.cache.is_value_requested(&key) {
                Path::Wait
            } else {
                Path::Request
            }
        };

        match path {
            Path::Deliver(value) => {
                handler.callback(&value);
                Ok(())
            }
            Path::Wait => Ok(()),
            Path::Request => {
                let id = self.send(msg)?;
                self.lock().pending.insert(id, handler);
                Ok(())
            }
        }
    }

    /// Remove a handler from a resource's subscriber list.
    ///
    /// Unsubscribing an unknown handler or key is a benign no-op so teardown
    /// stays idempotent. Removing the last handler sends an `unsub` message
    /// and evicts the cache entry.
    ///
    /// # Errors
    /// Returns an error only if the `unsub` message cannot be sent.
    pub fn unregister(&self, msg: &Message, handler: &Handler) -> Result<(), SessionError> {
        let emptied = {
            let mut inner = self.lock();
            let key = msg.key();
            let Some(handlers) = inner.subscribers.get_mut(&key) else {
                return Ok(());
            };
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
            if handlers.is_empty() {
                inner.subscribers.remove(&key);
                inner.cache.remove(&key);
                true
            } else {
                false
            }
        };

        if emptied {
            let mut unsub = Message::new(msg.resource_type(), "unsub");
            if let Some(id) = msg.id() {
                unsub.set_id(id);
            }
            unsub.set_nocache(true);
            unsub.set_subscription(false);
            self.send(unsub)?;
        }
        Ok(())
    }

    /// Register a gate.
    ///
    /// # Errors
    /// Returns an error if the name is empty.
    pub fn add_flag(&self, name: &str, active: bool) -> Result<(), SessionError> {
        Ok(self.lock().flags.add_flag(name, active)?)
    }

    /// Delete a gate, discarding messages still buffered behind it.
    pub fn remove_flag(&self, name: &str) {
        self.lock().flags.remove_flag(name);
    }

    /// Set a gate's state. On a transition to active the gate's buffer is
    /// flushed in arrival order through the normal send path (re-entering
    /// every other gating and caching check) before listeners fire.
    ///
    /// # Errors
    /// Returns an error if the gate is unknown.
    pub fn set_flag(&self, name: &str, active: bool) -> Result<(), SessionError> {
        let listeners: Vec<ListenerFn> = {
            let mut inner = self.lock();
            let activation = inner.flags.set_active(name, active)?;
            for msg in activation.messages {
                if let Err(e) = send_locked(&mut inner, msg) {
                    tracing::warn!(flag = name, "gated resend failed: {e}");
                }
            }
            activation.listeners
        };
        for listener in listeners {
            listener();
        }
        Ok(())
    }

    /// Register a gate activation listener; invoked immediately if the gate
    /// is already active.
    ///
    /// # Errors
    /// Returns an error if the gate is unknown.
    pub fn add_flag_listener<F>(&self, name: &str, on_active: F, once: bool) -> Result<(), SessionError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let immediate = self
            .lock()
            .flags
            .add_listener(name, Arc::new(on_active), once)?;
        if let Some(listener) = immediate {
            listener();
        }
        Ok(())
    }

    /// Request disconnection and cancel the drain tick.
    ///
    /// # Errors
    /// Returns [`SessionError::CloseFailed`] if the transport does not
    /// report the closed state; the drain tick is then left running.
    pub fn close(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            if let Some(transport) = inner.transport.take() {
                if let Err(e) = transport.close() {
                    tracing::warn!("close request failed: {e}");
                }
                if transport.ready_state() != ReadyState::Closed {
                    inner.transport = Some(transport);
                    return Err(SessionError::CloseFailed);
                }
            }
            inner.state = ConnState::Disconnected;
            tracing::info!("closed");
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = tasks.pump.take() {
            pump.abort();
        }
        if let Some(drain) = tasks.drain.take() {
            drain.abort();
        }
        Ok(())
    }
}

/// The core send path. Runs with the state lock held; never invokes
/// callbacks.
fn send_locked(inner: &mut Inner, mut msg: Message) -> Result<u64, SessionError> {
    if msg.resource_type().is_empty() {
        return Err(SessionError::MissingType);
    }
    if msg.action().is_empty() {
        return Err(SessionError::MissingAction);
    }

    // Assigned exactly once; gate and buffer resends keep their id.
    let id = match msg.message_id() {
        Some(id) => id,
        None => {
            inner.message_counter += 1;
            let id = inner.message_counter;
            msg.set_message_id(id);
            id
        }
    };

    let Some(msg) = inner.flags.enqueue_if_blocked(msg)? else {
        tracing::debug!(msgid = id, "gated");
        return Ok(id);
    };

    if inner.state != ConnState::Connected {
        inner.outbound.push_back(msg);
        tracing::debug!(msgid = id, "buffered until connected");
        return Ok(id);
    }

    if msg.action() == "get" && !msg.nocache() && msg.has_id() {
        let key = msg.key();
        if inner.cache.contains(&key) || inner.cache.is_value_requested(&key) {
            tracing::debug!(msgid = id, "suppressed: answer cached or in flight");
            return Ok(id);
        }
        inner.cache.set_value_is_requested(key);
    }

    let payload = msg.to_json()?;
    match inner.transport.as_ref() {
        Some(transport) => {
            if let Err(e) = transport.send(&payload) {
                // Dead transport: rebuffer and let the pump confirm the drop.
                tracing::warn!(msgid = id, "write failed, rebuffering: {e}");
                inner.state = ConnState::Disconnected;
                inner.outbound.push_front(msg);
            } else {
                tracing::trace!("sent: {payload}");
            }
        }
        None => inner.outbound.push_back(msg),
    }
    Ok(id)
}

/// Flush the outbound buffer in FIFO order through the normal send path.
fn flush_outbound(inner: &mut Inner) {
    while inner.state == ConnState::Connected {
        let Some(msg) = inner.outbound.pop_front() else {
            break;
        };
        if let Err(e) = send_locked(inner, msg) {
            tracing::warn!("buffered send failed: {e}");
        }
    }
}

/// Process at most `batch` staged payloads, returning the handler
/// invocations to perform once the lock is released.
fn drain_inbound(inner: &mut Inner, batch: usize) -> Vec<(Handler, Message)> {
    let mut dispatches = Vec::new();
    for _ in 0..batch {
        let Some(payload) = inner.inbound.pop_front() else {
            break;
        };
        let msg = match Message::from_json(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("dropping malformed payload: {e}");
                continue;
            }
        };

        // A correlated one-shot reply goes to exactly one handler.
        if let Some(id) = msg.message_id() {
            if let Some(handler) = inner.pending.remove(&id) {
                dispatches.push((handler, msg));
                continue;
            }
        }

        let key = msg.key();
        if let Some(handlers) = inner.subscribers.get(&key) {
            for handler in handlers {
                dispatches.push((Arc::clone(handler), msg.clone()));
            }
        }
        inner.cache.add(msg);
    }
    dispatches
}
