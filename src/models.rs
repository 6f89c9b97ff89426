//! Typed payloads for common JSONAPI push sources.
//!
//! The listener receives raw `serde_json::Value` payloads; these structs
//! decode the shapes sent by the `chat` and `connections` sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields shared by every player event. `time` is in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub time: i64,
    pub player: String,
}

/// A chat line from the `chat` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub time: i64,
    pub player: String,
    pub message: String,
    #[serde(rename = "isCancelled", default)]
    pub is_cancelled: bool,
}

/// A join or quit from the `connections` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub time: i64,
    pub player: String,
    pub action: String,
}

fn timestamp(time: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time, 0)
}

impl PushEvent {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp(self.time)
    }
}

impl ChatMessage {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp(self.time)
    }

    /// Format as `[HH:MM:SS] <player> message`.
    pub fn display(&self) -> String {
        let when = self
            .timestamp()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        let cancelled = if self.is_cancelled { " (cancelled)" } else { "" };
        format!("[{}] <{}> {}{}", when, self.player, self.message, cancelled)
    }
}

impl ConnectionEvent {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp(self.time)
    }

    /// Format as `[HH:MM:SS] player action`.
    pub fn display(&self) -> String {
        let when = self
            .timestamp()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        format!("[{}] {} {}", when, self.player, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_message_deserialize() {
        let json = r#"{
            "time": 1700000000,
            "player": "Alice",
            "message": "hello",
            "isCancelled": false
        }"#;
        let chat: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(chat.player, "Alice");
        assert!(!chat.is_cancelled);
        assert_eq!(chat.display(), "[22:13:20] <Alice> hello");
    }

    #[test]
    fn test_cancelled_chat_display() {
        let chat = ChatMessage {
            time: 0,
            player: "Bob".to_string(),
            message: "spam".to_string(),
            is_cancelled: true,
        };
        assert_eq!(chat.display(), "[00:00:00] <Bob> spam (cancelled)");
    }

    #[test]
    fn test_connection_event_deserialize() {
        let json = r#"{"time": 1700000000, "player": "Bob", "action": "connected"}"#;
        let event: ConnectionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.action, "connected");
        assert_eq!(
            event.timestamp().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
        assert_eq!(event.display(), "[22:13:20] Bob connected");
    }

    #[test]
    fn test_push_event_ignores_extra_fields() {
        let json = r#"{"time": 5, "player": "Carol", "message": "x"}"#;
        let event: PushEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.player, "Carol");
        assert_eq!(event.timestamp().unwrap().timestamp(), 5);
    }
}
