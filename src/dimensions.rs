use ab_glyph::FontArc;
use image::RgbImage;

use crate::calibration::CalibrationRatio;
use crate::detection::DetectionCandidate;
use crate::errors::{MeasureError, Result};
use crate::image_utils::{draw_label, draw_polygon_outline, OUTLINE_COLOR, OUTLINE_THICKNESS};
use crate::shape_analysis::{min_area_rect, RotatedRect};

/// Physical dimensions of one measured object
#[derive(Debug, Clone)]
pub struct DimensionResult {
    /// Longer side in centimeters
    pub width_cm: f64,
    /// Shorter side in centimeters
    pub height_cm: f64,
    /// Ratio of the rectangle's sides in pixels, 1.0 for a zero-height rectangle
    pub aspect_ratio: f64,
    pub rect: RotatedRect,
    pub confidence: Option<f64>,
    pub class_label: Option<String>,
    /// Copy of the source image with the measured rectangle drawn on it
    pub annotated: RgbImage,
}

/// Confidence-weighted blend of a measurement with itself
///
/// `value * c + value * (1 - c)`. Both terms use the same value, so the
/// result equals `value` up to floating point rounding; kept in this exact
/// form so outputs do not shift if the weighting changes later.
pub fn confidence_blend(value: f64, confidence: f64) -> f64 {
    value * confidence + value * (1.0 - confidence)
}

/// Round to two decimal places
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Measure a candidate and annotate a copy of `original`
///
/// The font, when present, is used to print class and confidence.
pub fn measure(
    candidate: &DetectionCandidate,
    ratio: CalibrationRatio,
    original: &RgbImage,
    font: Option<&FontArc>,
) -> Result<DimensionResult> {
    if !candidate.is_valid() {
        return Err(MeasureError::DegenerateGeometry(format!(
            "region with {} points has no area",
            candidate.region.len()
        )));
    }

    let rect = min_area_rect(&candidate.region).ok_or_else(|| {
        MeasureError::DegenerateGeometry("region has no points".to_string())
    })?;

    let (width_pixels, height_pixels) = (rect.width, rect.height);
    let aspect_ratio = if height_pixels > 0.0 {
        width_pixels / height_pixels
    } else {
        1.0
    };

    let mut width_cm = ratio.to_cm(width_pixels);
    let mut height_cm = ratio.to_cm(height_pixels);

    if let (Some(_), Some(confidence)) = (&candidate.class_label, candidate.confidence) {
        width_cm = confidence_blend(width_cm, confidence);
        height_cm = confidence_blend(height_cm, confidence);
    }

    let (width_cm, height_cm) = if width_cm >= height_cm {
        (width_cm, height_cm)
    } else {
        (height_cm, width_cm)
    };

    let mut annotated = original.clone();
    draw_polygon_outline(&mut annotated, &rect.corners, OUTLINE_COLOR, OUTLINE_THICKNESS);

    if let Some(confidence) = candidate.confidence {
        let label = format!(
            "Class: {} ({:.2})",
            candidate.class_label.as_deref().unwrap_or("unknown"),
            confidence
        );
        match font {
            Some(font) => draw_label(&mut annotated, font, &label, OUTLINE_COLOR),
            None => tracing::debug!(%label, "no font configured, label not drawn"),
        }
    }

    Ok(DimensionResult {
        width_cm: round_to_hundredths(width_cm),
        height_cm: round_to_hundredths(height_cm),
        aspect_ratio,
        rect,
        confidence: candidate.confidence,
        class_label: candidate.class_label.clone(),
        annotated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionMethod;
    use crate::shape_analysis::box_to_polygon;
    use assert_approx_eq::assert_approx_eq;
    use image::Rgb;
    use imageproc::point::Point;

    fn candidate(region: Vec<Point<i32>>, confidence: Option<f64>, label: Option<&str>) -> DetectionCandidate {
        DetectionCandidate {
            region,
            confidence,
            class_label: label.map(str::to_string),
            method: DetectionMethod::Contour,
        }
    }

    #[test]
    fn blend_is_identity() {
        for value in [0.0, 1.0, 2.65, 5.27, 13.333, 1234.5678] {
            for step in 0..=20 {
                let c = step as f64 / 20.0;
                assert_approx_eq!(confidence_blend(value, c), value, 1e-12);
            }
        }
        assert_eq!(confidence_blend(7.5, 0.0), 7.5);
        assert_eq!(confidence_blend(7.5, 1.0), 7.5);
    }

    #[test]
    fn rounding_to_hundredths() {
        assert_eq!(round_to_hundredths(5.266), 5.27);
        assert_eq!(round_to_hundredths(2.624), 2.62);
        assert_eq!(round_to_hundredths(0.0), 0.0);
    }

    #[test]
    fn longer_side_is_width() {
        let ratio = CalibrationRatio::new(10.0).unwrap();
        let original = RgbImage::new(200, 300);
        let tall = candidate(box_to_polygon(20, 20, 60, 220), Some(0.6), None);

        let result = measure(&tall, ratio, &original, None).unwrap();
        assert_approx_eq!(result.width_cm, 20.0);
        assert_approx_eq!(result.height_cm, 4.0);
        assert!(result.width_cm >= result.height_cm);
    }

    #[test]
    fn labelled_candidate_matches_unlabelled() {
        let ratio = CalibrationRatio::new(37.79).unwrap();
        let original = RgbImage::new(300, 300);
        let region = box_to_polygon(10, 10, 209, 109);

        let plain = measure(&candidate(region.clone(), Some(0.83), None), ratio, &original, None).unwrap();
        let labelled = measure(&candidate(region, Some(0.83), Some("book")), ratio, &original, None).unwrap();

        assert_eq!(plain.width_cm, labelled.width_cm);
        assert_eq!(plain.height_cm, labelled.height_cm);
        assert_eq!(labelled.width_cm, 5.27);
        assert_eq!(labelled.height_cm, 2.62);
        assert_eq!(labelled.class_label.as_deref(), Some("book"));
    }

    #[test]
    fn annotation_draws_outline_on_copy() {
        let ratio = CalibrationRatio::new(10.0).unwrap();
        let original = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let result = measure(&candidate(box_to_polygon(20, 20, 80, 60), None, None), ratio, &original, None).unwrap();

        assert_eq!(result.annotated.get_pixel(50, 20), &OUTLINE_COLOR);
        assert_eq!(original.get_pixel(50, 20), &Rgb([255, 255, 255]));
        assert_eq!(result.annotated.dimensions(), original.dimensions());
    }

    #[test]
    fn degenerate_region_is_rejected() {
        let ratio = CalibrationRatio::new(10.0).unwrap();
        let original = RgbImage::new(10, 10);
        let flat = candidate(vec![Point::new(0, 0), Point::new(5, 0), Point::new(9, 0)], Some(0.5), None);
        assert!(matches!(
            measure(&flat, ratio, &original, None),
            Err(MeasureError::DegenerateGeometry(_))
        ));
    }
}
