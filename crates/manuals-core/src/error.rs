//! Error types for the manuals ingestion pipeline.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using the pipeline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ingestion operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required collaborator (storage, processor, database) is unavailable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manufacturer or model was not supplied with the upload.
    #[error("Missing equipment identity: {0}")]
    MissingIdentity(String),

    /// Equipment registry lookup failed or returned a malformed record.
    #[error("System lookup failed: {0}")]
    SystemLookup(String),

    /// Blob write failed.
    #[error("Upload error: {0}")]
    Upload(String),

    /// Uploaded blob never became readable within the retry window.
    #[error("Storage verification timed out for {path} after {attempts} attempts")]
    VerificationTimeout { path: String, attempts: u32 },

    /// External processor returned a failure.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Intelligence packet generation failed.
    #[error("Intelligence error: {0}")]
    Intelligence(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Blob storage read/write failure outside the upload path
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ingest job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Status change rejected by the job state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::MissingIdentity(_) => "VALIDATION_MISSING_IDENTITY",
            Self::SystemLookup(_) => "SYSTEM_LOOKUP_FAILED",
            Self::Upload(_) => "UPLOAD_ERROR",
            Self::VerificationTimeout { .. } => "STORAGE_VERIFICATION_TIMEOUT",
            Self::Processing(_) => "PROCESSING_ERROR",
            Self::Intelligence(_) => "INTELLIGENCE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::NotFound(_) | Self::JobNotFound(_) | Self::DocumentNotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Request(_) => "REQUEST_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures raised before any record is written.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingIdentity(_) | Self::SystemLookup(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_taxonomy() {
        assert_eq!(Error::Config("x".into()).code(), "CONFIGURATION_ERROR");
        assert_eq!(
            Error::MissingIdentity("x".into()).code(),
            "VALIDATION_MISSING_IDENTITY"
        );
        assert_eq!(Error::SystemLookup("x".into()).code(), "SYSTEM_LOOKUP_FAILED");
        assert_eq!(Error::Upload("x".into()).code(), "UPLOAD_ERROR");
        assert_eq!(
            Error::VerificationTimeout {
                path: "manuals/a/b.pdf".into(),
                attempts: 20
            }
            .code(),
            "STORAGE_VERIFICATION_TIMEOUT"
        );
        assert_eq!(Error::Processing("x".into()).code(), "PROCESSING_ERROR");
        assert_eq!(Error::Intelligence("x".into()).code(), "INTELLIGENCE_ERROR");
    }

    #[test]
    fn test_error_display_verification_timeout() {
        let err = Error::VerificationTimeout {
            path: "manuals/abc/manual.pdf".into(),
            attempts: 20,
        };
        assert_eq!(
            err.to_string(),
            "Storage verification timed out for manuals/abc/manual.pdf after 20 attempts"
        );
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = Error::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Parsing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> parsing"
        );
    }

    #[test]
    fn test_preflight_classification() {
        assert!(Error::Config("no storage".into()).is_preflight());
        assert!(Error::MissingIdentity("model".into()).is_preflight());
        assert!(Error::SystemLookup("no row".into()).is_preflight());
        assert!(!Error::Upload("denied".into()).is_preflight());
        assert!(!Error::Processing("500".into()).is_preflight());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().contains("Serialization error:"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[test]
    fn test_not_found_variants_share_code() {
        assert_eq!(Error::JobNotFound(Uuid::nil()).code(), "NOT_FOUND");
        assert_eq!(Error::DocumentNotFound("abc".into()).code(), "NOT_FOUND");
        assert_eq!(Error::NotFound("blob".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
