//! Error types for model loading and batch background removal

use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error types for model loading and per-image processing
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model resolution or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// The model provider reached its failed state
    #[error("Model failed to load: {0}")]
    ModelLoad(String),

    /// Inference was requested before the model provider became ready
    #[error("Model not ready: {0}")]
    NotReady(String),

    /// Remote registry transfer errors
    #[error("Network error: {0}")]
    Network(String),

    /// Pipeline stage errors (tensor shapes, compositing, encoding)
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new model load failure error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new not-ready error
    pub fn not_ready<S: Into<String>>(msg: S) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error with the failing operation as context
    pub fn network_error<S: Into<String>, E: Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {info})"),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{stage}'{input_context}: {details}"
        ))
    }

    /// Whether this error comes from the readiness gate rather than the pipeline
    #[must_use]
    pub fn is_readiness_error(&self) -> bool {
        matches!(self, Self::NotReady(_) | Self::ModelLoad(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BgRemovalError::invalid_config("test config error");
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

        let err = BgRemovalError::not_ready("model is loading");
        assert!(matches!(err, BgRemovalError::NotReady(_)));
        assert!(err.is_readiness_error());

        let err = BgRemovalError::processing("bad tensor");
        assert!(!err.is_readiness_error());
    }

    #[test]
    fn test_error_display() {
        let err = BgRemovalError::model_load("registry unreachable");
        assert_eq!(err.to_string(), "Model failed to load: registry unreachable");

        let err = BgRemovalError::network_error("Failed to download model.onnx", "timeout");
        assert_eq!(
            err.to_string(),
            "Network error: Failed to download model.onnx: timeout"
        );
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = BgRemovalError::file_io_error("create cache directory", "/var/cache/x", &io_error);
        let message = err.to_string();
        assert!(message.contains("create cache directory"));
        assert!(message.contains("/var/cache/x"));

        let err =
            BgRemovalError::processing_stage_error("compositing", "size mismatch", Some("37x53"));
        let message = err.to_string();
        assert!(message.contains("compositing"));
        assert!(message.contains("37x53"));
    }
}
