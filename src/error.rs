//! Error types for the fog verification engine

use thiserror::Error;

/// Errors that can occur while capturing, scoring or reporting motion
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Frame capture failed: {0}")]
    CaptureError(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Sensor error: {0}")]
    SensorError(String),

    #[error("Upload failed: {0}")]
    UploadError(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for VerifyError {
    fn from(err: image::ImageError) -> Self {
        VerifyError::ImageError(err.to_string())
    }
}
