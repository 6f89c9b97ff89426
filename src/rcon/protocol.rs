//! JSONAPI v2 wire formats.
//!
//! Outbound frames are text prefixed with an API path, followed by a JSON
//! array holding a single envelope:
//!
//! ```text
//! /api/2/call?json=[{"name":"getPlayers","username":"u","key":"..","arguments":[],"tag":"1"}]
//! /api/2/subscribe?json=[{"name":"chat","username":"u","key":"..","show_previous":false,"tag":"2"}]
//! ```
//!
//! Inbound frames are either a JSON array of command responses or a single
//! JSON object pushed to a subscription.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::error::RconError;

/// WebSocket path on the server.
pub const WEBSOCKET_PATH: &str = "/api/2/websocket";
/// Prefix of a command frame.
pub const CALL_PREFIX: &str = "/api/2/call?json=";
/// Prefix of a subscription frame.
pub const SUBSCRIBE_PREFIX: &str = "/api/2/subscribe?json=";

/// Build the WebSocket endpoint for a server.
pub fn endpoint(host: &str, port: u16) -> Result<Url, RconError> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    Url::parse(&format!("ws://{}:{}{}", host, port, WEBSOCKET_PATH))
        .map_err(|e| RconError::Protocol(format!("Invalid endpoint for host {}: {}", host, e)))
}

/// Correlation token echoed back by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag(value.to_string())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic tag source shared by commands and subscriptions.
#[derive(Debug)]
pub struct TagGenerator {
    next: AtomicU64,
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl TagGenerator {
    pub fn next_tag(&self) -> Tag {
        Tag(self.next.fetch_add(1, Ordering::Relaxed).to_string())
    }
}

/// Command envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub name: String,
    pub username: String,
    pub key: String,
    pub arguments: Vec<Value>,
    pub tag: Tag,
}

/// Subscription envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub name: String,
    pub username: String,
    pub key: String,
    pub show_previous: bool,
    pub tag: Tag,
}

/// Encode a command frame.
pub fn encode_call(command: &Command) -> Result<String, RconError> {
    Ok(format!(
        "{}{}",
        CALL_PREFIX,
        serde_json::to_string(std::slice::from_ref(command))?
    ))
}

/// Encode a subscription frame.
pub fn encode_subscribe(subscription: &Subscription) -> Result<String, RconError> {
    Ok(format!(
        "{}{}",
        SUBSCRIBE_PREFIX,
        serde_json::to_string(std::slice::from_ref(subscription))?
    ))
}

/// `result` field of a response or push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Success,
    Error,
}

/// One command response or subscription push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: ResultKind,
    #[serde(default)]
    pub source: String,
    pub tag: Tag,
    #[serde(default)]
    pub success: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.result == ResultKind::Success
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Replies to commands, in server order.
    Batch(Vec<Response>),
    /// A subscription push.
    Push(Response),
}

impl InboundFrame {
    /// Decode a raw text frame.
    ///
    /// Batch elements that do not decode are skipped; the rest of the batch
    /// is still delivered.
    pub fn parse(raw: &str) -> Result<Self, RconError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Array(items) => {
                let responses = items
                    .into_iter()
                    .filter_map(|item| match serde_json::from_value::<Response>(item) {
                        Ok(response) => Some(response),
                        Err(e) => {
                            debug!(error = %e, "Skipping malformed batch element");
                            None
                        }
                    })
                    .collect();
                Ok(InboundFrame::Batch(responses))
            }
            value @ Value::Object(_) => Ok(InboundFrame::Push(serde_json::from_value(value)?)),
            other => Err(RconError::Protocol(format!(
                "Unexpected frame shape: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_endpoint_format() {
        let url = endpoint("play.example.org", 20059).unwrap();
        assert_eq!(url.as_str(), "ws://play.example.org:20059/api/2/websocket");

        let v6 = endpoint("::1", 25565).unwrap();
        assert_eq!(v6.as_str(), "ws://[::1]:25565/api/2/websocket");
    }

    #[test]
    fn test_endpoint_rejects_garbage_host() {
        assert!(matches!(
            endpoint("bad host", 1),
            Err(RconError::Protocol(_))
        ));
    }

    #[test]
    fn test_tag_generator_is_monotonic_and_unique() {
        let tags = TagGenerator::default();
        let first = tags.next_tag();
        let second = tags.next_tag();

        assert_eq!(first.as_str(), "1");
        assert_eq!(second.as_str(), "2");
        assert_ne!(first, second);
    }

    #[test]
    fn test_encode_call_frame() {
        let command = Command {
            name: "getPlayers".to_string(),
            username: "u".to_string(),
            key: "k".to_string(),
            arguments: vec![],
            tag: Tag::from("7"),
        };

        assert_eq!(
            encode_call(&command).unwrap(),
            r#"/api/2/call?json=[{"name":"getPlayers","username":"u","key":"k","arguments":[],"tag":"7"}]"#
        );
    }

    #[test]
    fn test_encode_subscribe_frame() {
        let subscription = Subscription {
            name: "chat".to_string(),
            username: "u".to_string(),
            key: "k".to_string(),
            show_previous: true,
            tag: Tag::from("8"),
        };

        assert_eq!(
            encode_subscribe(&subscription).unwrap(),
            r#"/api/2/subscribe?json=[{"name":"chat","username":"u","key":"k","show_previous":true,"tag":"8"}]"#
        );
    }

    #[test]
    fn test_parse_batch_frame() {
        let raw = json!([
            {"result": "success", "source": "getPlayers", "tag": "1", "success": ["Alice", "Bob"]},
            {"result": "error", "source": "kick", "tag": "2", "error": "no permission"}
        ])
        .to_string();

        match InboundFrame::parse(&raw).unwrap() {
            InboundFrame::Batch(responses) => {
                assert_eq!(responses.len(), 2);
                assert!(responses[0].is_success());
                assert_eq!(responses[0].success, Some(json!(["Alice", "Bob"])));
                assert_eq!(responses[1].result, ResultKind::Error);
                assert_eq!(responses[1].error, Some(json!("no permission")));
            }
            other => panic!("Expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_batch_skips_malformed_elements() {
        let raw = r#"[{"nonsense": true}, {"result": "success", "source": "x", "tag": "3"}]"#;

        match InboundFrame::parse(raw).unwrap() {
            InboundFrame::Batch(responses) => {
                assert_eq!(responses.len(), 1);
                assert_eq!(responses[0].tag, Tag::from("3"));
                assert_eq!(responses[0].success, None);
            }
            other => panic!("Expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_push_frame() {
        let raw = r#"{"result":"success","source":"chat","tag":"4","success":{"player":"Alice","message":"hi","time":1700000000}}"#;

        match InboundFrame::parse(raw).unwrap() {
            InboundFrame::Push(push) => {
                assert_eq!(push.source, "chat");
                assert_eq!(push.tag, Tag::from("4"));
                assert_eq!(push.success.unwrap()["player"], "Alice");
            }
            other => panic!("Expected push, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(matches!(
            InboundFrame::parse("not json"),
            Err(RconError::Protocol(_))
        ));
        assert!(matches!(
            InboundFrame::parse("42"),
            Err(RconError::Protocol(_))
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"tag": "1"}"#),
            Err(RconError::Protocol(_))
        ));
    }
}
