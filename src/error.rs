// Subsystem error taxonomy
use thiserror::Error;

/// Structured failures surfaced to the caller so upstream HTTP/API layers
/// can map them to appropriate status codes. Nothing here is a generic
/// exception; nothing is silently swallowed except the serial allocator's
/// unavailability, which is logged and downgraded where it occurs.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Malformed input; recoverable by resubmitting corrected input
    #[error("{0}")]
    Validation(String),

    /// Referenced role/request/subject does not exist
    #[error("{0}")]
    NotFound(String),

    /// Duplicate name or pair, or an attempt to decide an already-decided request
    #[error("{0}")]
    Conflict(String),

    /// Caller lacks the required capability, or the operation is never permitted
    #[error("{0}")]
    Forbidden(String),

    /// Underlying store unreachable (allocator only; degraded, not propagated)
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type AccessResult<T> = Result<T, AccessError>;

impl AccessError {
    pub fn validation(message: impl Into<String>) -> Self {
        AccessError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AccessError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AccessError::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AccessError::Forbidden(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        AccessError::Unavailable(message.into())
    }

    /// Stable code for client/transport handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AccessError::Validation(_) => "VALIDATION_ERROR",
            AccessError::NotFound(_) => "NOT_FOUND",
            AccessError::Conflict(_) => "CONFLICT",
            AccessError::Forbidden(_) => "FORBIDDEN",
            AccessError::Unavailable(_) => "UNAVAILABLE",
            AccessError::Database(_) => "DATABASE_ERROR",
        }
    }
}
