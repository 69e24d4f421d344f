//! Session-facing contracts: transport, dialing and callback delivery.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Message;

/// Readiness of the underlying duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Writable.
    Open,
    /// Close requested, not yet confirmed.
    Closing,
    /// Fully closed.
    Closed,
}

/// Event surfaced by a transport to the session that owns it.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection became writable.
    Opened,
    /// A raw payload arrived from the server.
    Message(String),
    /// The transport failed; a `Closed` event follows.
    Error(String),
    /// The connection is gone.
    Closed,
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not writable (state {0:?})")]
    NotWritable(ReadyState),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("transport error: {0}")]
    Io(String),
}

/// One persistent duplex connection.
///
/// A session never multiplexes across transports; reconnection discards the
/// handle and dials a fresh one through the [`Connector`].
pub trait Transport: Send + Sync {
    /// Write one serialized payload to the wire.
    ///
    /// # Errors
    /// Returns an error if the transport is not writable.
    fn send(&self, payload: &str) -> Result<(), TransportError>;

    /// Current readiness.
    fn ready_state(&self) -> ReadyState;

    /// Request disconnection. Completion is reported through the event
    /// receiver, not by this call.
    ///
    /// # Errors
    /// Returns an error if the close request cannot be delivered.
    fn close(&self) -> Result<(), TransportError>;
}

/// Dials transports.
///
/// Dialing must not block: implementations hand back a handle in
/// [`ReadyState::Connecting`] immediately and finish the handshake on a
/// background task, reporting progress through the event receiver.
pub trait Connector: Send + Sync {
    fn dial(&self, url: &str) -> (Box<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>);
}

/// Consumer contract: receives resolved replies and subscription pushes.
pub trait CallbackHandler: Send + Sync {
    fn callback(&self, msg: &Message);
}
