//! Error types for the OCR pipeline

use std::path::PathBuf;

/// Result type alias for OCR operations
pub type Result<T> = std::result::Result<T, OcrError>;

/// Errors surfaced by the OCR engine
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// File could not be read (missing dictionary, unreadable model, ...)
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dictionary exists but is not usable
    #[error("character dictionary error: {0}")]
    Dictionary(String),

    /// Inference session could not be constructed
    #[error("failed to load model {path:?}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    /// Inference failed at run time
    #[error("inference failed: {0}")]
    Inference(String),

    /// The resource collaborator reported that models are not available
    #[error("OCR resources unavailable for language '{0}'")]
    ResourcesUnavailable(String),

    /// The resource collaborator failed (download, filesystem, ...)
    #[error("OCR resource error: {0:#}")]
    Resource(#[source] anyhow::Error),

    /// The blocking model-loading task panicked or was aborted
    #[error("model loading task failed: {0}")]
    Worker(String),

    /// `ensure_loaded` was cancelled through its token
    #[error("model loading was cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl OcrError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OcrError::Io {
            path: path.into(),
            source,
        }
    }
}
