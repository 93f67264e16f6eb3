//! Service-layer errors shared by the HTTP API and the CLI.

use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Caller supplied missing or malformed input.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    UnsupportedFormat(#[from] ExtractError),
    /// A collaborator (blob storage, generative model) failed.
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "bad_request",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::UnsupportedFormat(_) => "unsupported_format",
            ServiceError::Upstream(_) => "upstream",
            ServiceError::Internal(_) => "internal",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
