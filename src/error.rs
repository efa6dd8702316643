use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Incident record could not be turned into hashable fields
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Content hash failed integrity checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bounded queue rejected an item (backpressure)
    #[error("Queue '{queue}' is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    /// Queue no longer accepts items
    #[error("Queue '{0}' is closed")]
    QueueClosed(String),

    /// Invalid start/stop transition
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Enhancement collaborator failure
    #[error("External call error: {0}")]
    ExternalCall(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Extraction(_) => "EXTRACTION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::QueueFull { .. } => "QUEUE_FULL",
            AppError::QueueClosed(_) => "QUEUE_CLOSED",
            AppError::Lifecycle(_) => "LIFECYCLE_ERROR",
            AppError::ExternalCall(_) => "EXTERNAL_CALL_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error represents dropped work under backpressure
    pub fn is_backpressure(&self) -> bool {
        matches!(self, AppError::QueueFull { .. } | AppError::QueueClosed(_))
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
