//! Request/response correlation for commands.
//!
//! Each call registers a resolver under its tag before the frame is sent.
//! The first matching response resolves it; the timeout, a connection
//! close, or the caller dropping the future removes it. Resolution happens
//! at most once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::RconError;
use super::protocol::{Response, Tag};

/// Default time a command waits for its response.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

type Resolver = oneshot::Sender<Result<Value, RconError>>;

struct PendingCommand {
    method: String,
    epoch: u64,
    deadline: Instant,
    resolver: Resolver,
}

/// Tracks outstanding commands by tag.
pub struct CommandCorrelator {
    pending: Mutex<HashMap<Tag, PendingCommand>>,
    timeout: Duration,
}

/// Receives one command's outcome; removes the pending entry when dropped.
pub struct PendingReply<'a> {
    correlator: &'a CommandCorrelator,
    tag: Tag,
    receiver: oneshot::Receiver<Result<Value, RconError>>,
}

impl CommandCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<Tag, PendingCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a command sent on `epoch` under `tag`.
    pub fn register(&self, tag: Tag, method: &str, epoch: u64) -> PendingReply<'_> {
        let (resolver, receiver) = oneshot::channel();
        let command = PendingCommand {
            method: method.to_string(),
            epoch,
            deadline: Instant::now() + self.timeout,
            resolver,
        };

        if self.lock_pending().insert(tag.clone(), command).is_some() {
            warn!(%tag, "Replaced a pending command with a duplicate tag");
        }

        PendingReply {
            correlator: self,
            tag,
            receiver,
        }
    }

    /// Deliver a batch element to its pending command.
    ///
    /// Returns `false` when no command is waiting on the tag (already timed
    /// out, or sent on an earlier connection).
    pub fn resolve(&self, response: Response) -> bool {
        let Some(command) = self.lock_pending().remove(&response.tag) else {
            debug!(tag = %response.tag, source = %response.source, "Dropping response for unknown tag");
            return false;
        };

        let outcome = if response.is_success() {
            Ok(response.success.unwrap_or(Value::Null))
        } else {
            Err(RconError::Remote {
                method: command.method,
                error: response.error.unwrap_or(Value::Null),
            })
        };

        debug!(
            tag = %response.tag,
            remaining_ms = command.deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Resolved command"
        );

        // The caller may have given up already; nothing to do then
        let _ = command.resolver.send(outcome);
        true
    }

    /// Fail every command sent on `epoch`. Returns how many were failed.
    pub fn fail_epoch(&self, epoch: u64, reason: &RconError) -> usize {
        let failed: Vec<PendingCommand> = {
            let mut pending = self.lock_pending();
            let tags: Vec<Tag> = pending
                .iter()
                .filter(|(_, command)| command.epoch == epoch)
                .map(|(tag, _)| tag.clone())
                .collect();
            tags.iter().filter_map(|tag| pending.remove(tag)).collect()
        };

        let count = failed.len();
        for command in failed {
            let _ = command.resolver.send(Err(reason.clone()));
        }
        count
    }

    /// Number of commands still waiting for a response on `epoch`.
    pub fn pending_on(&self, epoch: u64) -> usize {
        self.lock_pending()
            .values()
            .filter(|command| command.epoch == epoch)
            .count()
    }

    pub fn is_pending(&self, tag: &Tag) -> bool {
        self.lock_pending().contains_key(tag)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn forget(&self, tag: &Tag) -> bool {
        self.lock_pending().remove(tag).is_some()
    }
}

impl PendingReply<'_> {
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Wait for the response or the command timeout, whichever is first.
    pub async fn wait(mut self) -> Result<Value, RconError> {
        let window = self.correlator.timeout;

        match timeout(window, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RconError::Connection(
                "Command was abandoned before a response arrived".to_string(),
            )),
            Err(_) => {
                debug!(tag = %self.tag, "Command timed out");
                Err(RconError::Timeout(window.as_millis() as u64))
            }
        }
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.correlator.forget(&self.tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcon::protocol::ResultKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn response(tag: &str, result: ResultKind, payload: Value) -> Response {
        let (success, error) = match result {
            ResultKind::Success => (Some(payload), None),
            ResultKind::Error => (None, Some(payload)),
        };
        Response {
            result,
            source: "getPlayers".to_string(),
            tag: Tag::from(tag),
            success,
            error,
        }
    }

    #[tokio::test]
    async fn test_resolve_delivers_success_payload() {
        let correlator = CommandCorrelator::new(COMMAND_TIMEOUT);
        let reply = correlator.register(Tag::from("1"), "getPlayers", 1);

        assert!(correlator.resolve(response("1", ResultKind::Success, json!(["Alice", "Bob"]))));
        assert_eq!(reply.wait().await.unwrap(), json!(["Alice", "Bob"]));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_ignores_other_tags() {
        let correlator = CommandCorrelator::new(Duration::from_millis(50));
        let reply = correlator.register(Tag::from("1"), "getPlayers", 1);

        assert!(!correlator.resolve(response("2", ResultKind::Success, json!("wrong"))));
        assert!(correlator.is_pending(&Tag::from("1")));
        assert!(matches!(reply.wait().await, Err(RconError::Timeout(50))));
    }

    #[tokio::test]
    async fn test_error_response_becomes_remote_error() {
        let correlator = CommandCorrelator::new(COMMAND_TIMEOUT);
        let reply = correlator.register(Tag::from("5"), "kick", 1);

        correlator.resolve(response("5", ResultKind::Error, json!("no permission")));

        match reply.wait().await {
            Err(RconError::Remote { method, error }) => {
                assert_eq!(method, "kick");
                assert_eq!(error, json!("no permission"));
            }
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_drops_late_response() {
        let correlator = CommandCorrelator::new(Duration::from_millis(30));
        let reply = correlator.register(Tag::from("9"), "getPlayers", 1);

        let started = Instant::now();
        assert!(matches!(reply.wait().await, Err(RconError::Timeout(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));

        assert!(!correlator.is_pending(&Tag::from("9")));
        assert!(!correlator.resolve(response("9", ResultKind::Success, json!(1))));
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let correlator = CommandCorrelator::new(COMMAND_TIMEOUT);
        let reply = correlator.register(Tag::from("3"), "getPlayers", 1);

        assert!(correlator.resolve(response("3", ResultKind::Success, json!("first"))));
        assert!(!correlator.resolve(response("3", ResultKind::Success, json!("second"))));
        assert_eq!(reply.wait().await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_fail_epoch_only_touches_that_epoch() {
        let correlator = CommandCorrelator::new(COMMAND_TIMEOUT);
        let old = correlator.register(Tag::from("1"), "a", 1);
        let current = correlator.register(Tag::from("2"), "b", 2);

        let reason = RconError::Connection("Connection closed by server".to_string());
        assert_eq!(correlator.fail_epoch(1, &reason), 1);
        assert_eq!(correlator.pending_on(1), 0);
        assert_eq!(correlator.pending_on(2), 1);

        assert!(matches!(old.wait().await, Err(RconError::Connection(_))));

        correlator.resolve(response("2", ResultKind::Success, json!(true)));
        assert_eq!(current.wait().await.unwrap(), json!(true));
    }

    #[test]
    fn test_dropped_reply_forgets_tag() {
        let correlator = CommandCorrelator::new(COMMAND_TIMEOUT);
        let reply = correlator.register(Tag::from("4"), "getPlayers", 1);
        assert_eq!(reply.tag(), &Tag::from("4"));
        assert!(correlator.is_pending(&Tag::from("4")));

        drop(reply);
        assert!(!correlator.is_pending(&Tag::from("4")));
    }
}
