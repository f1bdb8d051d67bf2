use thiserror::Error;

/// Application-wide error types for quarry.
#[derive(Error, Debug)]
pub enum AppError {
    /// The configuration document is structurally invalid.
    #[error("Invalid configuration: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    /// The configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP request failed (non-success status or transport error).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request or navigation timed out.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Interactive session (browser) operation failed.
    #[error("Session error: {0}")]
    SessionError(String),

    /// The content source does not support the requested operation.
    #[error("Operation not supported by this content source: {0}")]
    Unsupported(&'static str),

    /// A collect instruction could not be evaluated against the page.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AppError {
    /// Returns true if this error came from fetching or navigating content.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::SessionError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors() {
        assert!(AppError::HttpError("HTTP 500".into()).is_fetch_error());
        assert!(AppError::NetworkError("reset".into()).is_fetch_error());
        assert!(AppError::Timeout(30_000).is_fetch_error());
        assert!(AppError::SessionError("target closed".into()).is_fetch_error());
        assert!(!AppError::Extraction("bad selector".into()).is_fetch_error());
        assert!(!AppError::Unsupported("click").is_fetch_error());
    }

    #[test]
    fn test_validation_message_joins_errors() {
        let err = AppError::ConfigValidation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Invalid configuration: a; b");
    }
}
