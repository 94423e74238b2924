//! Error taxonomy for the session engine.

use uuid::Uuid;

/// Input rejected before any state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message cannot be empty")]
    EmptyMessage,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("session not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to a remote collaborator. All of them roll back the pending turn.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response body is not valid JSON: {0}")]
    MalformedBody(String),
    #[error("no {0} endpoint configured")]
    NotConfigured(&'static str),
    #[error("invalid {name} endpoint '{raw}': {source}")]
    InvalidEndpoint {
        name: &'static str,
        raw: String,
        source: url::ParseError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("not a PDF file: {0}")]
    NotPdf(String),
    #[error("document not found: {0}")]
    NotFound(Uuid),
    #[error("document backend failed: {0}")]
    Backend(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a rejected or failed user turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a message is already being sent for session {0}")]
    Busy(Uuid),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("the answering service returned no usable content")]
    NoUsableAnswer,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl TurnError {
    /// True when the turn was never sent.
    pub fn is_not_sent(&self) -> bool {
        matches!(self, TurnError::Validation(_) | TurnError::Busy(_))
    }
}
