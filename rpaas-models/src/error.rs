//! Error taxonomy shared by the control plane, the operator adapter and the client.

use thiserror::Error;

/// Result alias used across the rpaas crates.
pub type Result<T, E = RpaasError> = std::result::Result<T, E>;

/// Domain error with a closed set of kinds.
///
/// Only the HTTP layer knows how each kind maps onto a status code; everything
/// below it returns one of these variants and lets the mapper decide.
#[derive(Debug, Error)]
pub enum RpaasError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Kind discriminant of [`RpaasError`], handy for assertions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    BadGateway,
    Unsupported,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
        }
    }
}

impl RpaasError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        RpaasError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        RpaasError::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        RpaasError::Validation(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        RpaasError::BadGateway(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        RpaasError::Unsupported(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RpaasError::NotFound(_) => ErrorKind::NotFound,
            RpaasError::Conflict(_) => ErrorKind::Conflict,
            RpaasError::Validation(_) => ErrorKind::Validation,
            RpaasError::BadGateway(_) => ErrorKind::BadGateway,
            RpaasError::Unsupported(_) => ErrorKind::Unsupported,
            RpaasError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand back to a tenant. Internal errors never leak.
    pub fn public_message(&self) -> Option<&str> {
        match self {
            RpaasError::NotFound(msg)
            | RpaasError::Conflict(msg)
            | RpaasError::Validation(msg)
            | RpaasError::BadGateway(msg)
            | RpaasError::Unsupported(msg) => Some(msg),
            RpaasError::Internal(_) => None,
        }
    }
}
