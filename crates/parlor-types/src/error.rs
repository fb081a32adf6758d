use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a realtime command or identity request.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The authorization predicate for the action failed
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A referenced channel, message or user does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or out-of-range payload
    #[error("invalid payload: {0}")]
    Validation(String),

    /// The document store could not be read or written
    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl ChatError {
    pub fn forbidden(what: impl Into<String>) -> Self {
        Self::Forbidden(what.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Forbidden,
    NotFound,
    Validation,
    Internal,
}

pub type ChatResult<T> = Result<T, ChatError>;
