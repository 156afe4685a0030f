use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether another attempt at the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Http(_) | SyncError::Backend(_) | SyncError::InvalidResponse(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
