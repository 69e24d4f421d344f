//! In-memory wire for tests and demos.
//!
//! A `MockConnector` hands out [`MockWire`]s that record every payload
//! written to them and let the test inject transport events (open, inbound
//! payloads, connection drops) at will.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use subwire_core::{Connector, ReadyState, Transport, TransportError, TransportEvent};

/// One dialed mock connection.
pub struct MockWire {
    state: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    refuse_close: AtomicBool,
}

impl MockWire {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            state: Mutex::new(ReadyState::Connecting),
            sent: Mutex::new(Vec::new()),
            events,
            refuse_close: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ReadyState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Complete the handshake: become writable and emit `Opened`.
    pub fn open(&self) {
        self.set_state(ReadyState::Open);
        let _ = self.events.send(TransportEvent::Opened);
    }

    /// Inject an inbound payload from the fake server.
    pub fn push<S: Into<String>>(&self, payload: S) {
        let _ = self.events.send(TransportEvent::Message(payload.into()));
    }

    /// Drop the connection from the far side.
    pub fn drop_connection(&self) {
        self.set_state(ReadyState::Closed);
        let _ = self.events.send(TransportEvent::Closed);
    }

    /// Make `close` stall in the `Closing` state instead of completing.
    pub fn refuse_close(&self) {
        self.refuse_close.store(true, Ordering::SeqCst);
    }

    /// Everything written to this wire, in write order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct MockTransport(Arc<MockWire>);

impl Transport for MockTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        let state = self.0.ready_state();
        if state != ReadyState::Open {
            return Err(TransportError::NotWritable(state));
        }
        self.0
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_owned());
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.0.ready_state()
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.0.refuse_close.load(Ordering::SeqCst) {
            self.0.set_state(ReadyState::Closing);
            return Ok(());
        }
        self.0.set_state(ReadyState::Closed);
        let _ = self.0.events.send(TransportEvent::Closed);
        Ok(())
    }
}

/// Connector producing in-memory wires.
#[derive(Default)]
pub struct MockConnector {
    auto_open: bool,
    wires: Mutex<Vec<Arc<MockWire>>>,
}

impl MockConnector {
    /// Wires start in `Connecting`; the test opens them explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires open as soon as they are dialed.
    #[must_use]
    pub fn auto_open() -> Self {
        Self {
            auto_open: true,
            wires: Mutex::new(Vec::new()),
        }
    }

    /// How many times the session dialed.
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.wires
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The `n`th dialed wire.
    ///
    /// # Panics
    /// Panics if fewer than `n + 1` dials happened.
    #[must_use]
    pub fn wire(&self, n: usize) -> Arc<MockWire> {
        Arc::clone(
            &self
                .wires
                .lock()
                .unwrap_or_else(PoisonError::into_inner)[n],
        )
    }

    /// The most recently dialed wire.
    ///
    /// # Panics
    /// Panics if nothing was dialed yet.
    #[must_use]
    pub fn last_wire(&self) -> Arc<MockWire> {
        let wires = self.wires.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(wires.last().expect("no wire dialed"))
    }
}

impl Connector for MockConnector {
    fn dial(&self, _url: &str) -> (Box<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let wire = Arc::new(MockWire::new(event_tx));
        if self.auto_open {
            wire.open();
        }
        self.wires
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&wire));
        (Box::new(MockTransport(wire)), event_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_records_writes_in_order() {
        let connector = MockConnector::new();
        let (transport, _events) = connector.dial("mock://test");
        let wire = connector.last_wire();

        assert!(transport.send("early").is_err()); // not open yet
        wire.open();
        transport.send("a").unwrap();
        transport.send("b").unwrap();
        assert_eq!(wire.sent(), ["a", "b"]);
    }

    #[tokio::test]
    async fn injected_events_arrive_in_order() {
        let connector = MockConnector::new();
        let (_transport, mut events) = connector.dial("mock://test");
        let wire = connector.last_wire();

        wire.open();
        wire.push("one");
        wire.drop_connection();

        assert!(matches!(events.recv().await, Some(TransportEvent::Opened)));
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Message(p)) if p == "one"
        ));
        assert!(matches!(events.recv().await, Some(TransportEvent::Closed)));
    }

    #[test]
    fn refused_close_stalls_in_closing() {
        let connector = MockConnector::auto_open();
        let (transport, _events) = connector.dial("mock://test");
        connector.last_wire().refuse_close();

        transport.close().unwrap();
        assert_eq!(transport.ready_state(), ReadyState::Closing);
    }
}
