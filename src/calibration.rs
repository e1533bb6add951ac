use serde::Serialize;

use crate::detection::Detector;
use crate::errors::{MeasureError, Result};
use crate::image_io::decode_image;
use crate::pipeline::select_best_candidate;
use crate::preprocessing::preprocess;
use crate::shape_analysis::min_area_rect;

/// Physical width assumed for the reference object when none is given
pub const DEFAULT_REFERENCE_WIDTH_CM: f64 = 10.0;

/// Ratio returned by the fixed calibrator
pub const DEFAULT_PIXELS_PER_CM: f64 = 37.79;

/// Pixels per centimeter; always finite and strictly positive
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct CalibrationRatio(f64);

impl CalibrationRatio {
    /// `None` for zero, negative, NaN or infinite ratios
    pub fn new(pixels_per_cm: f64) -> Option<Self> {
        if pixels_per_cm.is_finite() && pixels_per_cm > 0.0 {
            Some(Self(pixels_per_cm))
        } else {
            None
        }
    }

    pub fn pixels_per_cm(self) -> f64 {
        self.0
    }

    /// Convert a pixel distance to centimeters
    pub fn to_cm(self, pixels: f64) -> f64 {
        pixels / self.0
    }
}

impl std::fmt::Display for CalibrationRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} px/cm", self.0)
    }
}

/// Reference width to calibrate against, defaulting invalid input to 10 cm
pub fn resolve_reference_width(reference_width_cm: Option<f64>) -> f64 {
    match reference_width_cm {
        Some(width) if width.is_finite() && width > 0.0 => width,
        _ => DEFAULT_REFERENCE_WIDTH_CM,
    }
}

/// Pixels-per-centimeter ratio for a reference object of known width
///
/// Currently returns a fixed ratio whatever the reference width; see
/// [`calibrate_from_reference`] for a measurement-based ratio.
pub fn calibrate(reference_width_cm: f64) -> CalibrationRatio {
    tracing::debug!(reference_width_cm, ratio = DEFAULT_PIXELS_PER_CM, "fixed calibration");
    CalibrationRatio(DEFAULT_PIXELS_PER_CM)
}

/// Caller ratio when usable, otherwise the calibrator's default
pub fn resolve_ratio(supplied: Option<f64>) -> CalibrationRatio {
    match supplied.and_then(CalibrationRatio::new) {
        Some(ratio) => ratio,
        None => {
            if let Some(value) = supplied {
                tracing::debug!(value, "ignoring invalid calibration ratio");
            }
            calibrate(DEFAULT_REFERENCE_WIDTH_CM)
        }
    }
}

/// Derive a ratio from an image of an object with known physical width
///
/// The object is located exactly as in a measurement; its longer
/// minimum-area-rectangle side is taken as the reference width in pixels.
pub fn calibrate_from_reference(
    image_bytes: &[u8],
    reference_width_cm: f64,
    detector: &dyn Detector,
) -> Result<CalibrationRatio> {
    let reference_width_cm = resolve_reference_width(Some(reference_width_cm));

    let decoded = decode_image(image_bytes)?;
    let prep = preprocess(&decoded.image);
    let candidates = detector.detect(&prep.color, &prep.binary)?;
    let candidate = select_best_candidate(&candidates).ok_or(MeasureError::NoDetection)?;

    let rect = min_area_rect(&candidate.region).ok_or_else(|| {
        MeasureError::DegenerateGeometry("reference region has no points".to_string())
    })?;
    let measured_pixels = rect.width.max(rect.height);

    let ratio = CalibrationRatio::new(measured_pixels / reference_width_cm).ok_or_else(|| {
        MeasureError::DegenerateGeometry(format!(
            "reference object measured {:.1} px wide",
            measured_pixels
        ))
    })?;

    tracing::info!(
        measured_pixels,
        reference_width_cm,
        ratio = ratio.pixels_per_cm(),
        "calibrated from reference object"
    );

    Ok(ratio)
}
