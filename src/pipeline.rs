// src/pipeline.rs - Measurement orchestration: decode, detect, measure, annotate

use ab_glyph::FontArc;
use image::ImageFormat;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::calibration::{resolve_ratio, CalibrationRatio};
use crate::config::Config;
use crate::detection::{select_detector, DetectionCandidate, DetectionMethod, Detector};
use crate::dimensions::{measure, DimensionResult};
use crate::errors::{MeasureError, Result};
use crate::image_io::{decode_image, encode_image};
use crate::image_utils::{default_font, load_font};
use crate::preprocessing::{limit_dimensions, preprocess};

/// A successful measurement
#[derive(Debug, Clone)]
pub struct Measurement {
    pub dimensions: DimensionResult,
    /// Annotated image, encoded like the input when possible
    pub annotated_image: Vec<u8>,
    pub annotated_format: ImageFormat,
    pub method: DetectionMethod,
    pub ratio: CalibrationRatio,
    pub processing_ms: u64,
}

impl Measurement {
    pub fn width_cm(&self) -> f64 {
        self.dimensions.width_cm
    }

    pub fn height_cm(&self) -> f64 {
        self.dimensions.height_cm
    }
}

/// Result of one measurement request; never a partial success
#[derive(Debug, Clone)]
pub enum MeasurementOutcome {
    Success(Box<Measurement>),
    Failure { reason: String },
}

impl MeasurementOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        MeasurementOutcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MeasurementOutcome::Success(_))
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        match self {
            MeasurementOutcome::Success(m) => Some(m),
            MeasurementOutcome::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            MeasurementOutcome::Success(_) => None,
            MeasurementOutcome::Failure { reason } => Some(reason),
        }
    }
}

/// Pick the candidate to measure
///
/// Highest confidence when any usable candidate carries one, otherwise the
/// largest region. Candidates without positive area are never picked and do
/// not influence the choice of mode.
pub fn select_best_candidate(candidates: &[DetectionCandidate]) -> Option<&DetectionCandidate> {
    let valid: Vec<&DetectionCandidate> = candidates.iter().filter(|c| c.is_valid()).collect();

    if valid.iter().any(|c| c.confidence.is_some()) {
        valid.into_iter().max_by(|a, b| {
            a.confidence
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&b.confidence.unwrap_or(f64::NEG_INFINITY))
        })
    } else {
        valid.into_iter().max_by(|a, b| a.area().total_cmp(&b.area()))
    }
}

/// The measurement pipeline with its long-lived, read-only collaborators
pub struct MeasurementPipeline {
    detector: Arc<dyn Detector>,
    font: Option<FontArc>,
    max_image_dimension: Option<u32>,
}

impl MeasurementPipeline {
    /// Pipeline labelling annotations with the embedded font
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            font: embedded_font(),
            max_image_dimension: None,
        }
    }

    /// Build the pipeline described by a configuration
    ///
    /// A configured font replaces the embedded one; if it cannot be loaded
    /// the embedded font is kept.
    pub fn from_config(config: &Config) -> Self {
        let detector = select_detector(
            config.model_path.as_deref().map(std::path::Path::new),
            config.model_input_size,
            config.model_score_threshold,
        );

        let font = match config.font_path.as_ref().map(load_font) {
            Some(Ok(font)) => Some(font),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "configured label font unavailable, using embedded font");
                embedded_font()
            }
            None => embedded_font(),
        };

        Self {
            detector,
            font,
            max_image_dimension: config.max_image_dimension,
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_max_image_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.max_image_dimension = max_dimension;
        self
    }

    pub fn detector(&self) -> &dyn Detector {
        self.detector.as_ref()
    }

    /// Measure the single best object in an encoded image
    ///
    /// Never panics and never returns an error: every fault, including a
    /// panic inside a stage, is reported as `Failure`.
    pub fn estimate_dimensions(&self, image_bytes: &[u8], pixels_per_cm: Option<f64>) -> MeasurementOutcome {
        let start = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(image_bytes, pixels_per_cm, start)));

        match result {
            Ok(Ok(measurement)) => {
                tracing::info!(
                    width_cm = measurement.width_cm(),
                    height_cm = measurement.height_cm(),
                    method = %measurement.method,
                    elapsed_ms = measurement.processing_ms,
                    "measurement completed"
                );
                MeasurementOutcome::Success(Box::new(measurement))
            }
            Ok(Err(e)) => {
                match e {
                    MeasureError::NoDetection => tracing::warn!("no objects detected in image"),
                    ref other => tracing::error!(error = %other, "measurement failed"),
                }
                MeasurementOutcome::failure(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(%reason, "measurement panicked");
                MeasurementOutcome::failure(format!("internal error: {}", reason))
            }
        }
    }

    fn run(&self, image_bytes: &[u8], pixels_per_cm: Option<f64>, start: Instant) -> Result<Measurement> {
        let decoded = decode_image(image_bytes)?;
        let image = limit_dimensions(decoded.image, self.max_image_dimension);

        tracing::info!(width = image.width(), height = image.height(), "processing image");

        let prep = preprocess(&image);
        let candidates = self.detector.detect(&prep.color, &prep.binary)?;
        let target = select_best_candidate(&candidates).ok_or(MeasureError::NoDetection)?;

        let ratio = resolve_ratio(pixels_per_cm);
        let dimensions = measure(target, ratio, &prep.color, self.font.as_ref())?;
        let (annotated_image, annotated_format) = encode_image(&dimensions.annotated, decoded.format)?;

        Ok(Measurement {
            dimensions,
            annotated_image,
            annotated_format,
            method: target.method,
            ratio,
            processing_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn embedded_font() -> Option<FontArc> {
    match default_font() {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::error!(error = %e, "annotation labels disabled");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
