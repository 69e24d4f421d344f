//! Wire-format message value object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key identifying a cacheable/subscribable resource.
///
/// An absent `id` denotes the collection ("list") slot for the type,
/// distinct from every real instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    /// Resource category (the `type` wire field).
    pub resource_type: String,
    /// Instance id, or `None` for the collection slot.
    pub id: Option<String>,
}

impl ResourceKey {
    /// Create a key for a single instance or, with `id = None`, a collection.
    #[must_use]
    pub fn new<S: Into<String>>(resource_type: S, id: Option<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id,
        }
    }
}

/// A single protocol message.
///
/// Wire schema (field identity is by name, never by position):
///
/// ```json
/// { "msgid": 1, "id": "42", "type": "user", "action": "get",
///   "sub": true, "nocache": false, "rels": ["circle"], "flags": [], "data": {} }
/// ```
///
/// Fields at their default value are omitted from the payload, so
/// `Message::from_json(m.to_json()?)?` is field-wise equal to `m`.
/// No validation happens at construction; a missing `type` or `action`
/// only becomes an error when the session attempts to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msgid", default, skip_serializing_if = "Option::is_none")]
    message_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    action: String,
    #[serde(rename = "sub", default = "default_true", skip_serializing_if = "is_true")]
    subscription: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    nocache: bool,
    #[serde(rename = "rels", default, skip_serializing_if = "Vec::is_empty")]
    relations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
}

const fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_true(b: &bool) -> bool {
    *b
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

impl Default for Message {
    fn default() -> Self {
        Self {
            message_id: None,
            id: None,
            resource_type: String::new(),
            action: String::new(),
            subscription: true,
            nocache: false,
            relations: Vec::new(),
            flags: Vec::new(),
            data: Value::Null,
        }
    }
}

impl Message {
    /// Create a message for a resource type and action verb.
    #[must_use]
    pub fn new<T: Into<String>, A: Into<String>>(resource_type: T, action: A) -> Self {
        Self {
            resource_type: resource_type.into(),
            action: action.into(),
            ..Self::default()
        }
    }

    /// Correlation id, absent until assigned at first send.
    #[must_use]
    pub const fn message_id(&self) -> Option<u64> {
        self.message_id
    }

    pub const fn set_message_id(&mut self, message_id: u64) {
        self.message_id = Some(message_id);
    }

    #[must_use]
    pub const fn has_message_id(&self) -> bool {
        self.message_id.is_some()
    }

    /// Instance id; absent denotes a collection/list resource.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id<S: Into<String>>(&mut self, id: S) {
        self.id = Some(id.into());
    }

    #[must_use]
    pub const fn has_id(&self) -> bool {
        self.id.is_some()
    }

    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn set_resource_type<S: Into<String>>(&mut self, resource_type: S) {
        self.resource_type = resource_type.into();
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn set_action<S: Into<String>>(&mut self, action: S) {
        self.action = action.into();
    }

    /// Whether the caller wants ongoing pushes, not just one reply.
    #[must_use]
    pub const fn subscription(&self) -> bool {
        self.subscription
    }

    pub const fn set_subscription(&mut self, subscription: bool) {
        self.subscription = subscription;
    }

    /// Whether the cache layer should be bypassed.
    #[must_use]
    pub const fn nocache(&self) -> bool {
        self.nocache
    }

    pub const fn set_nocache(&mut self, nocache: bool) {
        self.nocache = nocache;
    }

    /// Related type names to request alongside.
    #[must_use]
    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn add_relation<S: Into<String>>(&mut self, relation: S) {
        self.relations.push(relation.into());
    }

    pub fn remove_relation(&mut self, relation: &str) {
        self.relations.retain(|r| r != relation);
    }

    /// Gate names required before this message may be sent.
    #[must_use]
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn add_flag<S: Into<String>>(&mut self, flag: S) {
        self.flags.push(flag.into());
    }

    pub fn remove_flag(&mut self, flag: &str) {
        self.flags.retain(|f| f != flag);
    }

    /// Opaque payload value.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    /// The `(type, id)` pair this message addresses.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
        }
    }

    /// Serialize to the canonical wire payload.
    ///
    /// # Errors
    /// Returns an error if the `data` value cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a wire payload.
    ///
    /// # Errors
    /// Returns an error if the payload is not valid JSON for the schema.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
