use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;

#[derive(Debug, Error)]
pub enum HydrateError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Template error at byte {offset}: {message}")]
    TemplateError { offset: usize, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Composition error: {0}")]
    CompositionError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Row decode error: {0}")]
    DecodeError(String),

    #[error("Relation `{relation}` failed: {source}")]
    RelationError {
        relation: &'static str,
        #[source]
        source: Box<HydrateError>,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("No rows found")]
    NotFound,

    #[error("Other error: {0}")]
    Other(String),
}

impl HydrateError {
    pub(crate) fn template(offset: usize, message: impl Into<String>) -> Self {
        HydrateError::TemplateError {
            offset,
            message: message.into(),
        }
    }

    /// Errors raised while composing a `QuerySpec`, before any statement runs.
    #[must_use]
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            HydrateError::TemplateError { .. }
                | HydrateError::ConfigError(_)
                | HydrateError::CompositionError(_)
        )
    }

    /// Errors a relation cannot degrade gracefully from: aborts, and nested queries that break
    /// the composition bounds.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            HydrateError::Cancelled
            | HydrateError::DeadlineExceeded
            | HydrateError::CompositionError(_) => true,
            HydrateError::RelationError { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for HydrateError {
    fn from(err: serde_json::Error) -> Self {
        HydrateError::DecodeError(format!("json: {err}"))
    }
}
