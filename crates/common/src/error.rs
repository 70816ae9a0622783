//! Error types for CyberLab

use thiserror::Error;

/// Result type alias using CyberLab Error
pub type Result<T> = std::result::Result<T, Error>;

/// CyberLab error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Missing required field: {0}")]
    Validation(String),

    #[error("File exceeds the {limit_mb} MB upload limit")]
    UploadTooLarge { limit_mb: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// NotFound for a machine id.
    pub fn machine_not_found(id: u64) -> Self {
        Error::NotFound {
            kind: "machine".to_string(),
            id: id.to_string(),
        }
    }
}
