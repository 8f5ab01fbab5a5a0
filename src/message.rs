use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::util::{get_path, kind_of, set_path};

/// A flow message: a JSON object whose `payload` field carries the content.
///
/// The object invariant is enforced on construction, so every `Message` can
/// be handed to the template engine as a scope view without re-checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Message {
    inner: Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("a message must be a JSON object, got {0}")]
pub struct NotAnObject(pub String);

impl Message {
    pub fn new(payload: Value) -> Self {
        Self {
            inner: json!({
                "_msgid": uuid::Uuid::new_v4().to_string(),
                "payload": payload,
            }),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, NotAnObject> {
        match value {
            Value::Object(_) => Ok(Self { inner: value }),
            other => Err(NotAnObject(kind_of(&other).to_string())),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.inner.get("_msgid").and_then(Value::as_str)
    }

    /// Assigns a fresh `_msgid` when the message arrived without one.
    pub fn ensure_id(&mut self) {
        if self.id().is_none() {
            self.set("_msgid", json!(uuid::Uuid::new_v4().to_string()));
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        self.inner.get("payload")
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.set("payload", payload);
    }

    pub fn has_empty_payload(&self) -> bool {
        matches!(self.payload(), Some(Value::String(s)) if s.is_empty())
    }

    /// Replaces a string payload with its parsed form when it holds valid JSON.
    pub fn parse_json_payload(&mut self) -> bool {
        let parsed = match self.payload() {
            Some(Value::String(text)) => serde_json::from_str::<Value>(text).ok(),
            _ => None,
        };
        match parsed {
            Some(value) => {
                self.set_payload(value);
                true
            }
            None => false,
        }
    }

    /// Reads a dotted property path such as `payload.temp`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.inner, path)
    }

    /// Writes a dotted property path, creating intermediate objects.
    /// Non-object intermediates are replaced.
    pub fn set(&mut self, path: &str, value: Value) {
        set_path(&mut self.inner, path, value);
    }

    pub fn as_value(&self) -> &Value {
        &self.inner
    }
}

impl TryFrom<Value> for Message {
    type Error = NotAnObject;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Message::from_value(value)
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        msg.inner
    }
}
