//! The host-facing side of a node: status indicator, message routing and the
//! per-message error signal.
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::bridge::BridgeError;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFill {
    Red,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusShape {
    Dot,
    Ring,
}

/// The indicator shown under a node. All fields empty clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<StatusFill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<StatusShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl NodeStatus {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn ok() -> Self {
        Self {
            fill: Some(StatusFill::Green),
            shape: Some(StatusShape::Dot),
            text: Some(String::new()),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            fill: Some(StatusFill::Red),
            shape: Some(StatusShape::Dot),
            text: Some(text.into()),
        }
    }

    pub fn is_clear(&self) -> bool {
        self.fill.is_none() && self.shape.is_none() && self.text.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.fill == Some(StatusFill::Red)
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.fill, self.text.as_deref()) {
            (None, _) => f.write_str("(cleared)"),
            (Some(fill), Some(text)) if !text.is_empty() => write!(f, "{fill:?}: {text}"),
            (Some(fill), _) => write!(f, "{fill:?}"),
        }
    }
}

/// Routing primitives the host runtime hands to a node for one message.
pub trait NodeOutput: Send + Sync {
    fn status(&self, status: NodeStatus);
    fn send(&self, msg: Message);
    /// Ends processing of the current message, with an error if it failed.
    fn done(&self, error: Option<BridgeError>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Status(NodeStatus),
    Send(Message),
    Done(Option<BridgeError>),
}

/// Keeps every routing call in order. Used to drive a node without a host.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    events: Mutex<Vec<OutputEvent>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutputEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.lock().clone()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Send(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Status(status) => Some(status.clone()),
                _ => None,
            })
            .collect()
    }

    /// The most recent status that is not a clear.
    pub fn last_status(&self) -> Option<NodeStatus> {
        self.statuses().into_iter().rev().find(|s| !s.is_clear())
    }

    /// `Some(error)` once `done` was called; the inner option is the error.
    pub fn completion(&self) -> Option<Option<BridgeError>> {
        self.lock().iter().find_map(|e| match e {
            OutputEvent::Done(err) => Some(err.clone()),
            _ => None,
        })
    }
}

impl NodeOutput for RecordingOutput {
    fn status(&self, status: NodeStatus) {
        self.lock().push(OutputEvent::Status(status));
    }

    fn send(&self, msg: Message) {
        self.lock().push(OutputEvent::Send(msg));
    }

    fn done(&self, error: Option<BridgeError>) {
        self.lock().push(OutputEvent::Done(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(NodeStatus::clear()).unwrap(), json!({}));
        assert_eq!(
            serde_json::to_value(NodeStatus::error("Missing Status")).unwrap(),
            json!({"fill": "red", "shape": "dot", "text": "Missing Status"})
        );
        assert_eq!(
            serde_json::to_value(NodeStatus::ok()).unwrap(),
            json!({"fill": "green", "shape": "dot", "text": ""})
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(NodeStatus::clear().to_string(), "(cleared)");
        assert_eq!(NodeStatus::ok().to_string(), "Green");
        assert_eq!(NodeStatus::error("boom").to_string(), "Red: boom");
    }

    #[test]
    fn test_recording_output_keeps_order() {
        let out = RecordingOutput::new();
        let msg = Message::new(json!(1));
        out.status(NodeStatus::clear());
        out.status(NodeStatus::ok());
        out.send(msg.clone());
        out.done(None);

        assert_eq!(
            out.events(),
            vec![
                OutputEvent::Status(NodeStatus::clear()),
                OutputEvent::Status(NodeStatus::ok()),
                OutputEvent::Send(msg.clone()),
                OutputEvent::Done(None),
            ]
        );
        assert_eq!(out.sent(), vec![msg]);
        assert_eq!(out.last_status(), Some(NodeStatus::ok()));
        assert_eq!(out.completion(), Some(None));
    }

    #[test]
    fn test_completion_carries_error() {
        let out = RecordingOutput::new();
        assert_eq!(out.completion(), None);
        out.status(NodeStatus::error("connection refused"));
        out.done(Some(BridgeError::Transport("connection refused".into())));
        assert_eq!(
            out.completion(),
            Some(Some(BridgeError::Transport("connection refused".into())))
        );
        assert!(out.last_status().unwrap().is_error());
        assert!(out.sent().is_empty());
    }
}
