use strata_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrataError {
    /// Upstream rejected the call: non-2xx HTTP status or a non-zero
    /// payload code.
    #[error("API error {status_or_code}: {message}")]
    Api { status_or_code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Record set error: {0}")]
    Model(#[from] ModelError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    pub fn api(status_or_code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            status_or_code,
            message: message.into(),
        }
    }

    /// Whether a retry of the same stage could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StrataError::Api { .. }
            | StrataError::Transport(_)
            | StrataError::Decode(_)
            | StrataError::Store(_) => true,
            StrataError::Transform(_)
            | StrataError::Validation(_)
            | StrataError::Configuration(_)
            | StrataError::Cancelled
            | StrataError::Model(_)
            | StrataError::Internal(_) => false,
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(StrataError::api(40203, "too many calls").is_retryable());
        assert!(StrataError::Store(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!StrataError::Configuration("no date".into()).is_retryable());
        assert!(!StrataError::Cancelled.is_retryable());
    }
}
