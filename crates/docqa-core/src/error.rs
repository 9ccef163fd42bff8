use core::result::Result as CoreResult;
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for docqa operations.
pub type Result<T> = CoreResult<T, Error>;

/// Input rejected before it could touch the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Source text was empty or whitespace-only.
    #[error("document content is empty")]
    EmptyContent,

    /// Source file exceeds the configured size limit.
    #[error("file is too large: {size} bytes (limit {limit})")]
    FileTooLarge {
        /// Size of the rejected file in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// Chunking produced more chunks than a single document may hold.
    #[error("document produces {count} chunks (limit {limit})")]
    TooManyChunks {
        /// Number of chunks the document would produce.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Two vectors that must be compared have different lengths.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the catalog (or left operand) uses.
        expected: usize,
        /// Dimension that was supplied.
        actual: usize,
    },
}

/// Errors that can occur in the docqa crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The file could not be turned into text.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// The file type is not supported by the extractor.
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// The embedding service failed.
    #[error("Embedding service error: {0}")]
    Embedding(String),

    /// The text-generation service failed.
    #[error("Generation service error: {0}")]
    Generation(String),

    /// The operation was cancelled by its caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Loading or saving the catalog snapshot failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// An HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Determines whether this error may succeed if retried.
    ///
    /// Returns `true` for transient failures of the remote model services.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Embedding(_) | Self::Generation(_)
        )
    }

    /// Returns `true` when this error only reports a caller-initiated cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Shorthand for a dimension mismatch validation error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::Validation(ValidationError::DimensionMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, from_str};
    use std::io;

    #[test]
    fn test_error_display() {
        let error1 = Error::Validation(ValidationError::EmptyContent);
        assert_eq!(
            error1.to_string(),
            "Validation error: document content is empty"
        );

        let error2 = Error::dimension_mismatch(384, 768);
        assert_eq!(
            error2.to_string(),
            "Validation error: embedding dimension mismatch: expected 384, got 768"
        );

        let error3 = Error::UnsupportedFileType("pdf".to_owned());
        assert_eq!(error3.to_string(), "Unsupported file type: pdf");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Embedding("timeout".to_owned()).is_retryable());
        assert!(Error::Generation("503".to_owned()).is_retryable());

        assert!(!Error::Validation(ValidationError::EmptyContent).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Persistence("disk full".to_owned()).is_retryable());
    }

    #[test]
    fn test_cancellation_is_not_a_service_failure() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::Generation("aborted".to_owned()).is_cancellation());
    }

    #[test]
    fn test_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_error = from_str::<JsonValue>("invalid json").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json(_)));
    }
}
