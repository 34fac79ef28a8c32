use uuid::Uuid;

/// Errors surfaced by notification and detector operations.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("notification {0} not found")]
    NotFound(Uuid),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("data store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("stored value could not be decoded: {0}")]
    Corrupt(String),
}

impl AlertError {
    /// Only store outages are worth retrying; the rest need caller action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AlertError::Unavailable(_))
    }
}

pub type AlertResult<T> = Result<T, AlertError>;
