//! Client transport implementations.
//!
//! Provides:
//! - WebSocket connector over `tokio-tungstenite` (feature: websocket)
//! - In-memory mock wire for tests and demos (feature: mock)

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "mock")]
pub use mock::{MockConnector, MockWire};

#[cfg(feature = "websocket")]
pub use websocket::WsConnector;
