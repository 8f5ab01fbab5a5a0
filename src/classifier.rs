//! Interpretation of a collector acknowledgement.
use serde_json::Value;

use crate::collector::Acknowledgement;
use crate::message::Message;
use crate::node::NodeStatus;

pub const UNKNOWN_RESPONSE: &str = "Unknown Response";
pub const MISSING_STATUS: &str = "Missing Status";
pub const EMPTY_PAYLOAD: &str = "Message has an empty payload";
pub const PAYLOAD_NOT_OBJECT: &str = "Payload must be an object to merge machinechat data";

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Forward the input message unchanged.
    Accepted,
    /// Forward this message, which carries the collector's `mc` data.
    Enriched(Message),
    PayloadNotObject,
    /// The collector answered with another code; holds its message.
    Rejected(String),
    MissingStatus,
    UnknownResponse,
}

impl Verdict {
    pub fn status(&self) -> NodeStatus {
        match self {
            Verdict::Accepted | Verdict::Enriched(_) => NodeStatus::ok(),
            Verdict::PayloadNotObject => NodeStatus::error(PAYLOAD_NOT_OBJECT),
            Verdict::Rejected(message) => NodeStatus::error(message.as_str()),
            Verdict::MissingStatus => NodeStatus::error(MISSING_STATUS),
            Verdict::UnknownResponse => NodeStatus::error(UNKNOWN_RESPONSE),
        }
    }

    /// The message to send onward, if any.
    pub fn into_forward(self, input: Message) -> Option<Message> {
        match self {
            Verdict::Accepted => Some(input),
            Verdict::Enriched(msg) => Some(msg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    success_code: String,
    merge: bool,
}

impl Classifier {
    pub fn new(success_code: impl Into<String>, merge: bool) -> Self {
        Self {
            success_code: success_code.into(),
            merge,
        }
    }

    pub fn classify(&self, ack: Acknowledgement, input: &Message) -> Verdict {
        let Some(context) = ack.context else {
            return Verdict::UnknownResponse;
        };
        let Some(status) = context.status else {
            return Verdict::MissingStatus;
        };
        let Some(code) = status.code else {
            return Verdict::MissingStatus;
        };
        if !code.eq_ignore_ascii_case(&self.success_code) {
            return Verdict::Rejected(status.message.unwrap_or(code));
        }
        if !self.merge {
            return Verdict::Accepted;
        }
        if !input.payload().is_some_and(Value::is_object) {
            return Verdict::PayloadNotObject;
        }
        match context.mc {
            None => Verdict::Accepted,
            Some(mc) => {
                let mut enriched = ack
                    .msg
                    .filter(|msg| msg.payload().is_some_and(Value::is_object))
                    .unwrap_or_else(|| input.clone());
                enriched.set("payload.mc", mc);
                Verdict::Enriched(enriched)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SUCCESS_CODE;
    use serde_json::json;

    fn ack(value: Value) -> Acknowledgement {
        Acknowledgement::from_value(value)
    }

    fn ok_ack(mc: Value) -> Acknowledgement {
        ack(json!({"machinechat_context": {"status": {"code": "CODEC-NODERED-001", "message": "ok"}, "mc": mc}}))
    }

    #[test]
    fn test_unknown_and_missing() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, false);
        let input = Message::new(json!({}));

        assert_eq!(classifier.classify(ack(json!({})), &input), Verdict::UnknownResponse);
        assert_eq!(
            classifier.classify(ack(json!({"machinechat_context": {}})), &input),
            Verdict::MissingStatus
        );
        assert_eq!(
            classifier.classify(ack(json!({"machinechat_context": {"status": {"message": "x"}}})), &input),
            Verdict::MissingStatus
        );
        assert_eq!(Verdict::UnknownResponse.status(), NodeStatus::error("Unknown Response"));
    }

    #[test]
    fn test_rejected_carries_collector_message() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, false);
        let input = Message::new(json!({}));
        let verdict = classifier.classify(
            ack(json!({"machinechat_context": {"status": {"code": "CODEC-ERR-9", "message": "bad device"}}})),
            &input,
        );
        assert_eq!(verdict, Verdict::Rejected("bad device".into()));
        assert_eq!(verdict.status().text(), "bad device");
        assert_eq!(verdict.into_forward(input), None);
    }

    #[test]
    fn test_success_code_is_case_insensitive() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, false);
        let input = Message::new(json!("reading"));
        let verdict = classifier.classify(
            ack(json!({"machinechat_context": {"status": {"code": "codec-nodered-001"}}})),
            &input,
        );
        assert_eq!(verdict, Verdict::Accepted);
        assert_eq!(verdict.status(), NodeStatus::ok());
        assert_eq!(verdict.into_forward(input.clone()), Some(input));
    }

    #[test]
    fn test_merge_into_input() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, true);
        let input = Message::new(json!({}));
        let Verdict::Enriched(out) = classifier.classify(ok_ack(json!({"x": 1})), &input) else {
            panic!("expected enrichment");
        };
        assert_eq!(out.get("payload.mc.x"), Some(&json!(1)));
        assert_eq!(out.id(), input.id());
    }

    #[test]
    fn test_merge_prefers_returned_message() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, true);
        let input = Message::new(json!({"t": 1}));
        let verdict = classifier.classify(
            ack(json!({
                "machinechat_context": {"status": {"code": "CODEC-NODERED-001"}, "mc": {"x": 2}},
                "msg": {"_msgid": "remote", "payload": {"t": 5}}
            })),
            &input,
        );
        let out = verdict.into_forward(input).unwrap();
        assert_eq!(out.id(), Some("remote"));
        assert_eq!(out.payload(), Some(&json!({"t": 5, "mc": {"x": 2}})));
    }

    #[test]
    fn test_merge_without_mc_forwards_input() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, true);
        let input = Message::new(json!({"t": 1}));
        let verdict = classifier.classify(ok_ack(Value::Null), &input);
        assert_eq!(verdict, Verdict::Accepted);
    }

    #[test]
    fn test_merge_needs_object_payload() {
        let classifier = Classifier::new(DEFAULT_SUCCESS_CODE, true);
        let input = Message::new(json!("text"));
        let verdict = classifier.classify(ok_ack(json!({"x": 1})), &input);
        assert_eq!(verdict, Verdict::PayloadNotObject);
        assert_eq!(verdict.status().text(), PAYLOAD_NOT_OBJECT);
        assert!(verdict.status().is_error());
    }
}
