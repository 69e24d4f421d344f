//! Demo client: subscribe to the "user" collection over a WebSocket session.
//!
//! Run with: cargo run -p echo-client-demo -- ws://localhost:8080/sync
//!
//! Messages must not hit the wire before the server has acknowledged
//! authentication, so everything is tagged with an "auth" gate that a real
//! client would activate from its login handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use subwire_core::{EventCallbacks, Message};
use subwire_session::ConnectionSession;
use subwire_transport::WsConnector;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .context("usage: echo-client-demo <ws-url>")?;

    let session = ConnectionSession::new(Arc::new(WsConnector));
    session.connect(&url)?;

    session.add_flag("auth", false)?;
    session.add_flag_listener("auth", || tracing::info!("authenticated"), true)?;

    let users = Arc::new(EventCallbacks::new());
    users.on("set", |data| tracing::info!("user update: {data}"))?;
    users.on("del", |data| tracing::info!("user removed: {data}"))?;

    let mut subscribe = Message::new("user", "get");
    subscribe.add_flag("auth");
    session.register(subscribe, users)?;

    // A real client would flip this from its login reply handler.
    session.set_flag("auth", true)?;

    tokio::signal::ctrl_c().await?;
    if let Err(e) = session.close() {
        // The close frame is confirmed asynchronously; give it a moment.
        tracing::warn!("close still in flight: {e}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}
