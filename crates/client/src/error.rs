use thiserror::Error;

/// Single failure type surfaced by every persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Non-success response from the storage API.
    #[error("storage request failed ({status}): {message}")]
    Transport { status: u16, message: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid storage base address `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("storage request could not be sent: {0}")]
    Request(#[from] reqwest::Error),

    #[error("local database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PersistenceError {
    /// Build a transport error from a status line and an optional
    /// server-provided message.
    pub fn transport(status: u16, status_text: Option<&str>, detail: Option<&str>) -> Self {
        let message = match (status_text, detail.map(str::trim).filter(|d| !d.is_empty())) {
            (Some(text), Some(detail)) => format!("{text}: {detail}"),
            (Some(text), None) => text.to_string(),
            (None, Some(detail)) => detail.to_string(),
            (None, None) => format!("HTTP {status}"),
        };
        Self::Transport { status, message }
    }
}
