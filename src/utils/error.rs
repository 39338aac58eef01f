//! Error Handling Module
//!
//! Defines the error type shared by every stage of a training run.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for segmentation training
#[derive(Error, Debug)]
pub enum SegError {
    /// Error loading or decoding an image or label file
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset assembly or batching
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error building or running a model
    #[error("Model error: {0}")]
    Model(String),

    /// Error inside the training loop
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error (missing or malformed fields)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error saving or restoring model weights
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Unsupported model family or backbone
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Convenience Result type for segmentation training
pub type Result<T> = std::result::Result<T, SegError>;

impl From<serde_json::Error> for SegError {
    fn from(err: serde_json::Error) -> Self {
        SegError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        SegError::Serialization(format!("image encoding failed: {}", err))
    }
}
