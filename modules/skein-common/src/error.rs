use thiserror::Error;

use crate::types::RunStatus;

pub type Result<T> = std::result::Result<T, SkeinError>;

#[derive(Error, Debug)]
pub enum SkeinError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: RunStatus, to: RunStatus },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SkeinError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
