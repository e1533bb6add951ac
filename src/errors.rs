use thiserror::Error;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Custom error types for the measurement pipeline
#[derive(Error, Debug)]
pub enum MeasureError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("Image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("No objects detected")]
    NoDetection,

    #[error("Degenerate region: {0}")]
    DegenerateGeometry(String),

    #[error("Measurement timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model error: {0}")]
    Model(String),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, MeasureError>;
