// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Command error: {0}")]
    Command(#[from] crate::port::CommandError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// True when the underlying failure is a command timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Command(crate::port::CommandError::Timeout(_)))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
