use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Local I/O error: {0}")]
    LocalIoError(String),

    #[error("Already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl AppError {
    /// Classify a reqwest failure into the device error taxonomy
    pub fn from_request(context: &str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::NOT_FOUND {
                return AppError::NotFound(context.to_string());
            }
            return AppError::ProtocolError(format!("{context}: HTTP {status}"));
        }
        if err.is_decode() {
            return AppError::ProtocolError(format!("{context}: {err}"));
        }
        AppError::NetworkError(format!("{context}: {err}"))
    }

    /// Entry disappeared between listing and use; the listing should be refreshed
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
