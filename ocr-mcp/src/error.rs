use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown engine type: {0}")]
    UnknownEngine(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend execution failed: {0}")]
    BackendExecution(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// Stable tag for the error kind, used in tool payloads and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::InvalidInput(_) => "invalid_input",
            OcrError::UnknownEngine(_) => "unknown_engine",
            OcrError::BackendUnavailable(_) => "backend_unavailable",
            OcrError::BackendExecution(_) => "backend_execution",
            OcrError::Internal(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for OcrError {
    fn from(err: tokio::task::JoinError) -> Self {
        OcrError::Internal(format!("OCR task panicked: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_preserve_context() {
        let err = OcrError::BackendExecution("status 500: model crashed".to_string());
        assert_eq!(
            err.to_string(),
            "Backend execution failed: status 500: model crashed"
        );
        assert_eq!(err.kind(), "backend_execution");
    }

    #[test]
    fn test_unknown_engine_kind() {
        let err = OcrError::UnknownEngine("foo".to_string());
        assert_eq!(err.kind(), "unknown_engine");
        assert!(err.to_string().contains("foo"));
    }
}
