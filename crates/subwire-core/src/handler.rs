//! Named-event dispatcher implementing the callback contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use crate::message::Message;
use crate::traits::CallbackHandler;

type EventFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Dispatcher configuration error.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("event name is empty")]
    EmptyEvent,
    #[error("group has no member events")]
    EmptyGroup,
}

/// Routes dispatched messages to closures registered per event name.
///
/// An event name is usually a message action ("get", "set", ...). Group
/// events expand to their member events both when registering callbacks and
/// when dispatching, so a consumer can treat several actions as one.
#[derive(Default)]
pub struct EventCallbacks {
    inner: Mutex<CallbackTable>,
}

#[derive(Default)]
struct CallbackTable {
    callbacks: HashMap<String, Vec<EventFn>>,
    groups: HashMap<String, Vec<String>>,
}

impl EventCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event (or each member of a group event).
    ///
    /// # Errors
    /// Returns an error if the event name is empty.
    pub fn on<F>(&self, event: &str, callback: F) -> Result<(), HandlerError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if event.is_empty() {
            return Err(HandlerError::EmptyEvent);
        }
        let callback: EventFn = Arc::new(callback);
        let mut table = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(members) = table.groups.get(event).cloned() {
            for member in members {
                table
                    .callbacks
                    .entry(member)
                    .or_default()
                    .push(Arc::clone(&callback));
            }
        } else {
            table
                .callbacks
                .entry(event.to_string())
                .or_default()
                .push(callback);
        }
        Ok(())
    }

    /// Declare a group event expanding to the given member events.
    ///
    /// # Errors
    /// Returns an error if the group name is empty or has no members.
    pub fn add_group_event<S: AsRef<str>>(
        &self,
        group: &str,
        events: &[S],
    ) -> Result<(), HandlerError> {
        if group.is_empty() {
            return Err(HandlerError::EmptyEvent);
        }
        if events.is_empty() {
            return Err(HandlerError::EmptyGroup);
        }
        let mut table = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        table.groups.insert(
            group.to_string(),
            events.iter().map(|e| e.as_ref().to_string()).collect(),
        );
        Ok(())
    }

    /// Dispatch a message's data to the callbacks of `event`, or of the
    /// message's action when no override is given.
    ///
    /// # Errors
    /// Returns an error if the resolved event name is empty.
    pub fn dispatch(&self, msg: &Message, event: Option<&str>) -> Result<(), HandlerError> {
        let event = event.unwrap_or_else(|| msg.action());
        if event.is_empty() {
            return Err(HandlerError::EmptyEvent);
        }
        // Clone the targets out so callbacks run without the table locked
        // and may re-register.
        let targets = {
            let table = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut targets = Vec::new();
            collect_targets(&table, event, &mut targets);
            targets
        };
        for callback in targets {
            callback(msg.data());
        }
        Ok(())
    }
}

fn collect_targets(table: &CallbackTable, event: &str, out: &mut Vec<EventFn>) {
    if let Some(members) = table.groups.get(event) {
        for member in members {
            collect_targets(table, member, out);
        }
    } else if let Some(callbacks) = table.callbacks.get(event) {
        out.extend(callbacks.iter().map(Arc::clone));
    }
}

impl CallbackHandler for EventCallbacks {
    fn callback(&self, msg: &Message) {
        if let Err(e) = self.dispatch(msg, None) {
            tracing::warn!("dropping dispatch: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn set_msg(data: Value) -> Message {
        let mut msg = Message::new("user", "set");
        msg.set_data(data);
        msg
    }

    #[test]
    fn dispatches_by_action() {
        let handler = EventCallbacks::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        handler
            .on("set", move |data| {
                assert_eq!(data["name"], "Ann");
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        handler.callback(&set_msg(json!({ "name": "Ann" })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_event_overrides_action() {
        let handler = EventCallbacks::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        handler
            .on("refresh", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        handler
            .dispatch(&set_msg(Value::Null), Some("refresh"))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn group_event_fans_out_to_members() {
        let handler = EventCallbacks::new();
        handler.add_group_event("write", &["set", "del"]).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        // Registering against the group registers against each member.
        handler
            .on("write", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        handler.callback(&set_msg(Value::Null));
        let mut del = Message::new("user", "del");
        del.set_data(Value::Null);
        handler.callback(&del);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Dispatching against the group hits each member once.
        handler.dispatch(&set_msg(Value::Null), Some("write")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn empty_event_name_is_rejected() {
        let handler = EventCallbacks::new();
        assert!(matches!(
            handler.on("", |_| {}),
            Err(HandlerError::EmptyEvent)
        ));
        assert!(matches!(
            handler.dispatch(&Message::default(), None),
            Err(HandlerError::EmptyEvent)
        ));
    }

    #[test]
    fn empty_group_is_rejected() {
        let handler = EventCallbacks::new();
        let no_events: &[&str] = &[];
        assert!(matches!(
            handler.add_group_event("write", no_events),
            Err(HandlerError::EmptyGroup)
        ));
    }

    #[test]
    fn unknown_event_dispatch_is_a_no_op() {
        let handler = EventCallbacks::new();
        handler
            .dispatch(&set_msg(Value::Null), Some("never-registered"))
            .unwrap();
    }
}
