use thiserror::Error;

/// Errors produced by the quiz engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed required fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// The prediction service or a store call failed, timed out or returned malformed data.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Referenced game, level, quiz or difficulty has no matching content.
    #[error("not found: {0}")]
    NotFound(String),

    /// The event is not valid for the current session state.
    #[error("invalid state: {0}")]
    State(String),

    /// Optimistic version check failed while saving learner progress.
    #[error("version conflict: {0}")]
    Conflict(String),

    /// Persisting data failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        EngineError::UpstreamUnavailable(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        EngineError::NotFound(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        EngineError::State(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        EngineError::Storage(message.into())
    }

    /// Stable machine-readable kind used in API error bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::UpstreamUnavailable(_) => "upstream_unavailable",
            EngineError::NotFound(_) => "not_found",
            EngineError::State(_) => "state_error",
            EngineError::Conflict(_) => "conflict",
            EngineError::Storage(_) => "storage_error",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::UpstreamUnavailable(_) | EngineError::Storage(_)
        )
    }
}

impl From<mongodb::error::Error> for EngineError {
    fn from(err: mongodb::error::Error) -> Self {
        EngineError::Storage(format!("MongoDB error: {}", err))
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::Storage(format!("Redis error: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(format!("Serialization error: {}", err))
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::Validation(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// MongoDB `E11000` duplicate key.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        _ => false,
    }
}
