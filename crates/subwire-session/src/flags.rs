//! Named boolean gates that defer outbound messages.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use subwire_core::Message;

/// Callback fired when a flag becomes active.
pub type ListenerFn = Arc<dyn Fn() + Send + Sync>;

/// Flag configuration error.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag name is empty")]
    EmptyName,
    #[error("flag `{0}` is not registered")]
    Unknown(String),
}

struct FlagListener {
    on_active: ListenerFn,
    once: bool,
}

struct Flag {
    active: bool,
    buffer: VecDeque<Message>,
    listeners: Vec<FlagListener>,
}

/// What a flag activation releases: buffered messages to resend through the
/// normal send path, then the listener callbacks to fire.
#[derive(Default)]
pub struct Activation {
    pub messages: Vec<Message>,
    pub listeners: Vec<ListenerFn>,
}

/// Registry of named gates.
///
/// A message tagged with a flag is never transmitted while that flag is
/// inactive; it sits in the flag's FIFO buffer until activation.
#[derive(Default)]
pub struct FlagRegistry {
    flags: HashMap<String, Flag>,
}

impl FlagRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag. Re-adding an existing name resets its buffer and
    /// listeners.
    ///
    /// # Errors
    /// Returns an error if the name is empty.
    pub fn add_flag(&mut self, name: &str, active: bool) -> Result<(), FlagError> {
        if name.trim().is_empty() {
            return Err(FlagError::EmptyName);
        }
        self.flags.insert(
            name.to_string(),
            Flag {
                active,
                buffer: VecDeque::new(),
                listeners: Vec::new(),
            },
        );
        Ok(())
    }

    /// Delete a flag. Messages still buffered behind it are discarded, not
    /// flushed and not errored.
    pub fn remove_flag(&mut self, name: &str) {
        if let Some(flag) = self.flags.remove(name) {
            if !flag.buffer.is_empty() {
                tracing::warn!(
                    flag = name,
                    dropped = flag.buffer.len(),
                    "removed flag discards buffered messages"
                );
            }
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    /// Set a flag's state. A transition to active drains the buffer (FIFO)
    /// and collects the listeners to fire; `once` listeners are removed,
    /// persistent ones stay registered for future activations.
    ///
    /// # Errors
    /// Returns an error if the flag is unknown.
    pub fn set_active(&mut self, name: &str, active: bool) -> Result<Activation, FlagError> {
        let flag = self
            .flags
            .get_mut(name)
            .ok_or_else(|| FlagError::Unknown(name.to_string()))?;
        flag.active = active;

        let mut activation = Activation::default();
        if active {
            activation.messages = flag.buffer.drain(..).collect();
            let mut kept = Vec::new();
            for listener in flag.listeners.drain(..) {
                activation.listeners.push(Arc::clone(&listener.on_active));
                if !listener.once {
                    kept.push(listener);
                }
            }
            flag.listeners = kept;
        }
        Ok(activation)
    }

    /// Register an activation listener. If the flag is already active the
    /// callback is handed back for immediate invocation; a `once` listener
    /// is then not registered at all, a persistent one still is.
    ///
    /// # Errors
    /// Returns an error if the flag is unknown.
    pub fn add_listener(
        &mut self,
        name: &str,
        on_active: ListenerFn,
        once: bool,
    ) -> Result<Option<ListenerFn>, FlagError> {
        let flag = self
            .flags
            .get_mut(name)
            .ok_or_else(|| FlagError::Unknown(name.to_string()))?;

        if flag.active {
            if !once {
                flag.listeners.push(FlagListener {
                    on_active: Arc::clone(&on_active),
                    once,
                });
            }
            return Ok(Some(on_active));
        }

        flag.listeners.push(FlagListener { on_active, once });
        Ok(None)
    }

    /// Gate check: the first inactive flag named on the message captures it
    /// and `None` is returned. `Some(msg)` hands the message back when every
    /// named flag is active.
    ///
    /// A message waits on at most one gate at a time; it is re-checked
    /// against the remaining gates only when it re-enters the send path on
    /// activation.
    ///
    /// # Errors
    /// Returns an error if any named flag is unknown.
    pub fn enqueue_if_blocked(&mut self, msg: Message) -> Result<Option<Message>, FlagError> {
        for name in msg.flags() {
            if !self.flags.contains_key(name) {
                return Err(FlagError::Unknown(name.clone()));
            }
        }

        let blocking = msg
            .flags()
            .iter()
            .find(|name| !self.flags[name.as_str()].active)
            .cloned();

        match blocking {
            Some(name) => {
                if let Some(flag) = self.flags.get_mut(&name) {
                    flag.buffer.push_back(msg);
                }
                Ok(None)
            }
            None => Ok(Some(msg)),
        }
    }
}
