//! Error types for the classifier service.
//!
//! Request-path failures are expressed as `ClassifierError` variants so the
//! server boundary can map each class to an HTTP status. Startup code keeps
//! `anyhow` with context; a `ClassifierError` propagates into it via `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Model artifact missing/corrupt or config inconsistent. Fatal: raised
    /// before the listener binds, never during serving.
    #[error("startup failed: {0}")]
    Startup(String),

    /// Malformed request (missing/unsupported content type, empty body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Payload did not decode as a supported image format.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Tensor shape does not match the configured model spec.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Score vector length does not match the label vocabulary.
    #[error("vocabulary mismatch: {labels} labels, {scores} scores")]
    VocabularyMismatch { labels: usize, scores: usize },

    /// Backend failure during model invocation.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Per-request inference deadline expired.
    #[error("inference timed out")]
    Timeout,
}

impl ClassifierError {
    /// Client errors are the caller's fault and safe to echo back; everything
    /// else is reported generically.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ClassifierError::InvalidRequest(_) | ClassifierError::InvalidImage(_)
        )
    }
}
