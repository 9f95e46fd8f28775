//! Error types for labstore-core.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabstoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid metadata entry {0:?}: keys and text values must be single lines")]
    InvalidMetadata(String),

    #[error("Global metadata keys already set while overwrite is disabled: {}", .0.join(", "))]
    DuplicateKey(Vec<String>),

    #[error("Invalid nametag {0:?}: must be non-blank and free of path separators")]
    InvalidTag(String),

    #[error("Data must be 1-D or 2-D, got {ndim}-D")]
    UnsupportedShape { ndim: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Expected {expected} per-column number formats, data has {found} columns")]
    FormatMismatch { expected: usize, found: usize },

    #[error("No data file to append to: {0}")]
    NoOpenFile(String),

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Unsupported image format: {0:?}")]
    UnsupportedImageFormat(String),

    #[error("Data written to {} but sidecar {} failed: {source}", .primary.display(), .sidecar.display())]
    PartialWriteFailure {
        primary: PathBuf,
        sidecar: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", .path.display())]
    LoadParseError { path: PathBuf, message: String },

    #[error("Operation not supported by {backend} storage: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Fit configuration not found: {0}")]
    FitConfigurationNotFound(String),

    #[error("Fit failed: {0}")]
    Fit(String),
}

impl LabstoreError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        LabstoreError::LoadParseError {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LabstoreError>;
