//! WebSocket connector over `tokio-tungstenite`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use subwire_core::{Connector, ReadyState, Transport, TransportError, TransportEvent};

/// Readiness cell shared between the handle and the socket task.
#[derive(Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(encode(state))))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(encode(state), Ordering::Release);
    }

    fn get(&self) -> ReadyState {
        match self.0.load(Ordering::Acquire) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

const fn encode(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

enum Outbound {
    Payload(String),
    Close,
}

/// Handle to a dialed WebSocket connection.
///
/// Writes go through a channel to the socket task; close completion is
/// reported asynchronously via [`TransportEvent::Closed`].
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: StateCell,
}

impl Transport for WsTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        let state = self.state.get();
        if state != ReadyState::Open {
            return Err(TransportError::NotWritable(state));
        }
        self.outbound
            .send(Outbound::Payload(payload.to_owned()))
            .map_err(|_| TransportError::Io("socket task gone".into()))
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn close(&self) -> Result<(), TransportError> {
        self.state.set(ReadyState::Closing);
        self.outbound
            .send(Outbound::Close)
            .map_err(|_| TransportError::Io("socket task gone".into()))
    }
}

/// Dials WebSocket connections.
///
/// `dial` must be called within a tokio runtime; the handshake and the
/// read/write pump run on a spawned task.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn dial(&self, url: &str) -> (Box<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = StateCell::new(ReadyState::Connecting);

        tokio::spawn(run_socket(url.to_owned(), state.clone(), out_rx, event_tx));

        (
            Box::new(WsTransport {
                outbound: out_tx,
                state,
            }),
            event_rx,
        )
    }
}

async fn run_socket(
    url: String,
    state: StateCell,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::error!(%url, "WebSocket connect failed: {e}");
            state.set(ReadyState::Closed);
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed);
            return;
        }
    };

    state.set(ReadyState::Open);
    let _ = events.send(TransportEvent::Opened);
    tracing::debug!(%url, "WebSocket open");

    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Payload(text)) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Handle dropped or close requested: say goodbye and stop.
                Some(Outbound::Close) | None => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message(text));
                        }
                        Err(_) => tracing::warn!("dropping non-UTF-8 binary frame"),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {e}");
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }

    state.set(ReadyState::Closed);
    let _ = events.send(TransportEvent::Closed);
    tracing::debug!(%url, "WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_roundtrips_every_state() {
        let cell = StateCell::new(ReadyState::Connecting);
        for state in [
            ReadyState::Connecting,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let transport = WsTransport {
            outbound: out_tx,
            state: StateCell::new(ReadyState::Connecting),
        };
        assert!(matches!(
            transport.send("{}"),
            Err(TransportError::NotWritable(ReadyState::Connecting))
        ));
    }

    #[tokio::test]
    async fn failed_dial_reports_error_then_closed() {
        let connector = WsConnector;
        let (transport, mut events) = connector.dial("ws://127.0.0.1:1/unreachable");

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Error(_))
        ));
        assert!(matches!(events.recv().await, Some(TransportEvent::Closed)));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }
}
