// ── RinChat Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Transport, Config).
//   • `#[from]` wires std/external error conversions automatically.
//   • Transport failures never escape as hard errors from the sync path;
//     they become supervisor signals. This enum covers the boundaries that
//     do return `Result` (persistence, HTTP, encoding).

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClientError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// WebSocket channel failure, tagged with the connection name.
    #[error("Transport error: {connection}: {message}")]
    Transport { connection: String, message: String },

    /// Client configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl ClientError {
    /// Create a transport error with connection name and message.
    pub fn transport(connection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { connection: connection.into(), message: message.into() }
    }
}

// ── Bridge conversions ─────────────────────────────────────────────────────

impl From<String> for ClientError {
    fn from(s: String) -> Self {
        ClientError::Other(s)
    }
}

impl From<&str> for ClientError {
    fn from(s: &str) -> Self {
        ClientError::Other(s.to_string())
    }
}

impl From<ClientError> for String {
    fn from(e: ClientError) -> Self {
        e.to_string()
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All fallible engine operations return this type.
pub type ClientResult<T> = Result<T, ClientError>;
