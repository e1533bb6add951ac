//! Object localization.
//!
//! Two strategies sit behind the [`Detector`] trait: a learned model
//! ([`LearnedDetector`]) and classical contour analysis ([`ContourDetector`]).
//! The strategy is chosen once at startup by [`select_detector`]; the learned
//! detector delegates to the contour detector whenever its model produces
//! nothing, and whichever strategy answers is authoritative for that call.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::contour_area;
use imageproc::point::Point;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::errors::Result;
use crate::model::{load_box_model, BoxModel, BoxPrediction};
use crate::shape_analysis::{box_to_polygon, calculate_solidity};

/// Contours enclosing less than this many square pixels are treated as noise
pub const MIN_CONTOUR_AREA: f64 = 1000.0;

/// Ceiling for contour confidences, below any learned detection worth keeping
pub const CLASSICAL_CONFIDENCE_CAP: f64 = 0.7;

/// Which strategy produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Learned,
    Contour,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMethod::Learned => write!(f, "learned"),
            DetectionMethod::Contour => write!(f, "contour"),
        }
    }
}

/// A region hypothesized to enclose one physical object
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionCandidate {
    /// Ordered polygon in pixel coordinates
    pub region: Vec<Point<i32>>,
    /// Relative ranking signal in [0, 1], not a calibrated probability
    pub confidence: Option<f64>,
    /// Absent for classical detections
    pub class_label: Option<String>,
    pub method: DetectionMethod,
}

impl DetectionCandidate {
    pub fn area(&self) -> f64 {
        contour_area(&self.region)
    }

    /// Whether the region encloses a positive pixel area
    pub fn is_valid(&self) -> bool {
        self.area() > 0.0
    }

    /// Candidate for an axis-aligned model box
    pub fn from_prediction(prediction: &BoxPrediction) -> Self {
        let region = box_to_polygon(
            prediction.x1.round() as i32,
            prediction.y1.round() as i32,
            prediction.x2.round() as i32,
            prediction.y2.round() as i32,
        );

        Self {
            region,
            confidence: Some(prediction.confidence as f64),
            class_label: prediction.label.clone(),
            method: DetectionMethod::Learned,
        }
    }
}

/// Produces ranked candidates from the two preprocessed views of an image
pub trait Detector: Send + Sync {
    /// Ranked candidates, best first; empty when nothing was found
    fn detect(&self, color: &RgbImage, binary: &GrayImage) -> Result<Vec<DetectionCandidate>>;

    fn method(&self) -> DetectionMethod;
}

/// Confidence of a classical detection from its solidity
pub fn contour_confidence(solidity: f64) -> f64 {
    (0.3 + 0.4 * solidity).min(CLASSICAL_CONFIDENCE_CAP)
}

/// Turn raw outer contours into ranked candidates
///
/// Drops contours under the noise floor, scores the rest by solidity and
/// sorts them by descending confidence.
pub fn rank_contours(contours: Vec<Vec<Point<i32>>>) -> Vec<DetectionCandidate> {
    let mut candidates: Vec<DetectionCandidate> = contours
        .into_iter()
        .filter(|points| contour_area(points) >= MIN_CONTOUR_AREA)
        .map(|points| {
            let solidity = calculate_solidity(&points);
            DetectionCandidate {
                confidence: Some(contour_confidence(solidity)),
                region: points,
                class_label: None,
                method: DetectionMethod::Contour,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .unwrap_or(0.0)
            .total_cmp(&a.confidence.unwrap_or(0.0))
    });

    candidates
}

/// Classical strategy: external contours of the binary image
#[derive(Debug, Default, Clone, Copy)]
pub struct ContourDetector;

impl ContourDetector {
    /// Outermost borders only, holes and nested shapes are ignored
    pub fn external_contours(binary: &GrayImage) -> Vec<Vec<Point<i32>>> {
        find_contours::<i32>(binary)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| c.points)
            .collect()
    }
}

impl Detector for ContourDetector {
    fn detect(&self, _color: &RgbImage, binary: &GrayImage) -> Result<Vec<DetectionCandidate>> {
        let contours = Self::external_contours(binary);
        let found = contours.len();
        let candidates = rank_contours(contours);

        tracing::debug!(
            contours = found,
            candidates = candidates.len(),
            "contour detection finished"
        );

        Ok(candidates)
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::Contour
    }
}

/// Learned strategy with contour fallback
pub struct LearnedDetector {
    model: Arc<dyn BoxModel>,
    fallback: ContourDetector,
}

impl LearnedDetector {
    pub fn new(model: Arc<dyn BoxModel>) -> Self {
        Self {
            model,
            fallback: ContourDetector,
        }
    }

    /// The single most confident usable box, if the model produced any
    fn best_prediction(&self, color: &RgbImage) -> Option<DetectionCandidate> {
        let predictions = match self.model.predict(color) {
            Ok(predictions) => predictions,
            Err(e) => {
                tracing::warn!(model = self.model.name(), error = %e, "inference failed, using contours");
                return None;
            }
        };

        predictions
            .iter()
            .map(DetectionCandidate::from_prediction)
            .filter(DetectionCandidate::is_valid)
            .max_by(|a, b| {
                a.confidence
                    .unwrap_or(0.0)
                    .total_cmp(&b.confidence.unwrap_or(0.0))
            })
    }
}

impl Detector for LearnedDetector {
    fn detect(&self, color: &RgbImage, binary: &GrayImage) -> Result<Vec<DetectionCandidate>> {
        if let Some(candidate) = self.best_prediction(color) {
            tracing::debug!(
                model = self.model.name(),
                confidence = candidate.confidence,
                label = candidate.class_label.as_deref(),
                "learned detection"
            );
            return Ok(vec![candidate]);
        }

        self.fallback.detect(color, binary)
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::Learned
    }
}

/// Pick the detection strategy for this process
///
/// The learned detector is used when weights are configured and load;
/// anything else falls back to contour detection.
pub fn select_detector(
    model_path: Option<&Path>,
    input_size: u32,
    score_threshold: f32,
) -> Arc<dyn Detector> {
    if let Some(path) = model_path {
        match load_box_model(path, input_size, score_threshold) {
            Ok(model) => {
                tracing::info!(model = model.name(), "using learned object detector");
                return Arc::new(LearnedDetector::new(model));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "learned detector unavailable, falling back to contour detection");
            }
        }
    }

    tracing::info!("using contour object detector");
    Arc::new(ContourDetector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MeasureError;
    use assert_approx_eq::assert_approx_eq;
    use image::Luma;

    struct FixedModel(Vec<BoxPrediction>);

    impl BoxModel for FixedModel {
        fn predict(&self, _image: &RgbImage) -> Result<Vec<BoxPrediction>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenModel;

    impl BoxModel for BrokenModel {
        fn predict(&self, _image: &RgbImage) -> Result<Vec<BoxPrediction>> {
            Err(MeasureError::Model("boom".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn prediction(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> BoxPrediction {
        BoxPrediction {
            x1,
            y1,
            x2,
            y2,
            confidence,
            label: Some("cup".to_string()),
        }
    }

    fn binary_with_square() -> GrayImage {
        let mut binary = GrayImage::new(120, 120);
        for y in 20..80 {
            for x in 20..80 {
                binary.put_pixel(x, y, Luma([255]));
            }
        }
        binary
    }

    #[test]
    fn noise_floor_boundary() {
        // 40x25 keeps exactly 1000 px², 37x27 encloses 999 px²
        let kept = box_to_polygon(0, 0, 40, 25);
        let dropped = box_to_polygon(100, 100, 137, 127);
        let ranked = rank_contours(vec![kept.clone(), dropped]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].region, kept);
    }

    #[test]
    fn noise_floor_through_traced_contours() {
        let mut binary = GrayImage::new(160, 80);
        // 41x26 pixels trace to a 40x25 polygon, 38x28 to 37x27
        for (x0, y0, w, h) in [(10u32, 10u32, 41u32, 26u32), (90, 10, 38, 28)] {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    binary.put_pixel(x, y, Luma([255]));
                }
            }
        }

        let candidates = ContourDetector
            .detect(&RgbImage::new(160, 80), &binary)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_approx_eq!(candidates[0].area(), 1000.0, 1e-9);
        assert!(candidates[0].region.iter().all(|p| p.x < 60));
    }

    #[test]
    fn confidence_is_capped() {
        assert_approx_eq!(contour_confidence(1.0), 0.7);
        assert_approx_eq!(contour_confidence(0.5), 0.5);
        assert_approx_eq!(contour_confidence(0.0), 0.3);
    }

    #[test]
    fn ranks_by_solidity() {
        let square = box_to_polygon(0, 0, 100, 100);
        let l_shape = vec![
            Point::new(200, 0),
            Point::new(300, 0),
            Point::new(300, 20),
            Point::new(220, 20),
            Point::new(220, 100),
            Point::new(200, 100),
        ];
        let ranked = rank_contours(vec![l_shape, square.clone()]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].region, square);
        assert!(ranked[0].confidence > ranked[1].confidence);
        assert!(ranked.iter().all(|c| c.class_label.is_none()));
    }

    #[test]
    fn contour_detector_finds_filled_square() {
        let binary = binary_with_square();
        let color = RgbImage::new(120, 120);
        let candidates = ContourDetector.detect(&color, &binary).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].method, DetectionMethod::Contour);
        assert_approx_eq!(candidates[0].area(), 59.0 * 59.0, 1e-9);
        assert_approx_eq!(candidates[0].confidence.unwrap(), 0.7, 1e-9);
    }

    #[test]
    fn contour_detector_on_empty_binary() {
        let binary = GrayImage::new(50, 50);
        let color = RgbImage::new(50, 50);
        assert!(ContourDetector.detect(&color, &binary).unwrap().is_empty());
    }

    #[test]
    fn learned_returns_single_best_box() {
        let model = FixedModel(vec![
            prediction(10.0, 10.0, 50.0, 40.0, 0.4),
            prediction(5.0, 5.0, 90.0, 60.0, 0.9),
            prediction(0.0, 0.0, 20.0, 20.0, 0.6),
        ]);
        let detector = LearnedDetector::new(Arc::new(model));
        let candidates = detector
            .detect(&RgbImage::new(100, 100), &GrayImage::new(100, 100))
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let best = &candidates[0];
        assert_eq!(best.method, DetectionMethod::Learned);
        assert_eq!(best.confidence, Some(0.9f32 as f64));
        assert_eq!(best.class_label.as_deref(), Some("cup"));
        assert_eq!(best.region, box_to_polygon(5, 5, 90, 60));
    }

    #[test]
    fn learned_skips_degenerate_boxes() {
        let model = FixedModel(vec![
            prediction(10.0, 10.0, 10.0, 40.0, 0.95),
            prediction(10.0, 10.0, 30.0, 40.0, 0.5),
        ]);
        let detector = LearnedDetector::new(Arc::new(model));
        let candidates = detector
            .detect(&RgbImage::new(100, 100), &GrayImage::new(100, 100))
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, Some(0.5f32 as f64));
    }

    #[test]
    fn learned_falls_back_to_contours() {
        let binary = binary_with_square();
        let color = RgbImage::new(120, 120);

        let models: Vec<Arc<dyn BoxModel>> = vec![Arc::new(FixedModel(Vec::new())), Arc::new(BrokenModel)];
        for model in models {
            let detector = LearnedDetector::new(model);
            let candidates = detector.detect(&color, &binary).unwrap();
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].method, DetectionMethod::Contour);
            assert!(candidates[0].class_label.is_none());
        }
    }

    #[test]
    fn select_without_weights_uses_contours() {
        assert_eq!(select_detector(None, 640, 0.25).method(), DetectionMethod::Contour);
        let missing = Path::new("/nonexistent/weights.rten");
        assert_eq!(select_detector(Some(missing), 640, 0.25).method(), DetectionMethod::Contour);
    }
}
