//! Error taxonomy shared by the messaging and automation services

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Caller input rejected before any side effect
    #[error("{0}")]
    Validation(String),

    /// Operator setup problem (credentials, template names, default assignees)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),

    /// Provider rejected the message; persistence has already been attempted
    #[error("{0}")]
    Delivery(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_REQUEST",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Delivery(_) => "DELIVERY_FAILED",
            Self::Store(_) => "DATABASE_ERROR",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
