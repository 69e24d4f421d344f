//! Connection session and gate registry.
//!
//! Provides:
//! - `FlagRegistry` - Named boolean gates deferring outbound messages
//! - `ConnectionSession` - The request/response + publish/subscribe engine

pub mod flags;
pub mod session;

pub use flags::{FlagError, FlagRegistry};
pub use session::{ConnectionSession, SessionError};
