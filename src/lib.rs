// src/lib.rs - Library interface for object dimension estimation

pub mod calibration;
pub mod config;
pub mod detection;
pub mod dimensions;
pub mod errors;
pub mod image_io;
pub mod image_utils;
pub mod model;
pub mod morphology;
pub mod output;
pub mod pipeline;
pub mod preprocessing;
pub mod service;
pub mod shape_analysis;

// Re-export commonly used types and functions
pub use errors::{MeasureError, Result};
pub use config::Config;
pub use pipeline::{select_best_candidate, Measurement, MeasurementOutcome, MeasurementPipeline};
pub use service::{FrameSource, MeasurementService, StillImageSource};
pub use image_io::{decode_image, encode_image, get_image_files_in_dir, load_image, InputImage};

// Re-export detection
pub use detection::{
    select_detector,
    ContourDetector,
    DetectionCandidate,
    DetectionMethod,
    Detector,
    LearnedDetector,
};
pub use model::{load_box_model, BoxModel, BoxPrediction};

// Re-export measurement and calibration
pub use calibration::{
    calibrate,
    calibrate_from_reference,
    resolve_ratio,
    CalibrationRatio,
    DEFAULT_PIXELS_PER_CM,
    DEFAULT_REFERENCE_WIDTH_CM,
};
pub use dimensions::{measure, DimensionResult};
pub use preprocessing::{preprocess, PreprocessedImage};
pub use shape_analysis::{min_area_rect, RotatedRect};

// Re-export reporting
pub use output::{reports_to_json, write_measurements_csv, MeasurementReport};
