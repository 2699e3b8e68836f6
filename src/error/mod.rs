use std::path::Path;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
}

/// Journey store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt journey record {journey_id}: {message}")]
    CorruptRecord { journey_id: String, message: String },

    #[error("Invalid journey ID: {journey_id:?}")]
    InvalidJourneyId { journey_id: String },
}

impl StorageError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Read-side query errors
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Invalid journey ID: {journey_id:?}")]
    InvalidJourneyId { journey_id: String },

    #[error("Journey not found: {journey_id}")]
    JourneyNotFound { journey_id: String },

    #[error("Corrupt journey record {journey_id}: {message}")]
    CorruptRecord { journey_id: String, message: String },

    #[error("Export to {path} failed: {message}")]
    Export { path: String, message: String },

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for AnalyzerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidJourneyId { journey_id } => {
                AnalyzerError::InvalidJourneyId { journey_id }
            }
            StorageError::CorruptRecord {
                journey_id,
                message,
            } => AnalyzerError::CorruptRecord {
                journey_id,
                message,
            },
            other => AnalyzerError::Storage(other),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for analyzer queries
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
