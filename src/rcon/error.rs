//! Error taxonomy for the RCON client.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// RCON client error types.
///
/// `Clone` because a single connection failure is delivered to every caller
/// waiting on the same connection attempt.
#[derive(Debug, Clone, Error)]
pub enum RconError {
    /// The transport never opened, or closed before the operation completed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// No matching response arrived within the command timeout.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Server answered a command with `result: "error"`.
    #[error("Server error for {method}: {error}")]
    Remote {
        /// Method the failing command invoked
        method: String,
        /// Error payload as sent by the server
        error: serde_json::Value,
    },

    /// Framing or encoding problem.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client was shut down.
    #[error("Client has been shut down")]
    Shutdown,
}

impl RconError {
    /// Whether a later attempt on a fresh connection could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RconError::Connection(_) | RconError::Timeout(_))
    }
}

impl From<tungstenite::Error> for RconError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Utf8 => RconError::Protocol("Invalid UTF-8 in frame".to_string()),
            tungstenite::Error::Capacity(e) => RconError::Protocol(e.to_string()),
            other => RconError::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RconError {
    fn from(err: serde_json::Error) -> Self {
        RconError::Protocol(err.to_string())
    }
}
