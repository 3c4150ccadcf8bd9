//! Error types for release sync operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while syncing a release.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during local file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error while talking to the release API.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// A line of a persisted manifest could not be parsed.
    #[error("Corrupt manifest {}: line {line}: {content:?}: {reason}", .path.display())]
    CorruptManifest {
        path: PathBuf,
        line: usize,
        content: String,
        reason: String,
    },

    /// The hosting service rejected or failed an asset upload.
    #[error("Upload of {key} to release {release} failed: {message}")]
    UploadFailed {
        release: String,
        key: String,
        message: String,
    },

    /// Any other failure talking to the hosting service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested asset does not exist in the release.
    #[error("Asset {key} not found in release {release}")]
    NotFound { release: String, key: String },

    /// A downloaded or cached file does not hash to its checksum.
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A manifest entry needs uploading but the local cache has no copy.
    #[error("No local copy of {checksum} ({filename}) in {}", .dir.display())]
    MissingCacheFile {
        checksum: String,
        filename: String,
        dir: PathBuf,
    },

    /// Hash algorithm name not recognized.
    #[error("Unknown hash algorithm {0:?} (valid: MD5, SHA224, SHA256, SHA384, SHA512)")]
    UnknownAlgorithm(String),

    /// A required directory does not exist.
    #[error("Missing directory {}", .0.display())]
    MissingDirectory(PathBuf),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Whether the error means the asset is simply absent from the release.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}
