use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("startup load failed: {0}")]
    StartupLoad(String),
}

impl ServiceError {
    pub fn key_required() -> Self { Self::Validation("Key is required".into()) }
    pub fn key_not_found() -> Self { Self::NotFound("Key not found".into()) }

    /// Message meant for an HTTP caller, without the variant prefix.
    pub fn public_message(&self) -> &str {
        match self {
            Self::Validation(m) | Self::NotFound(m) | Self::Persistence(m) | Self::StartupLoad(m) => m,
        }
    }
}
