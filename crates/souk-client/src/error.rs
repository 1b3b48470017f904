use souk_shared::{AuthError, ValidationError};
use souk_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the client stores and router.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Too many redirects navigating to {0}")]
    RedirectLoop(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
