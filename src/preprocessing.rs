use image::{DynamicImage, GrayImage, RgbImage};

use crate::morphology::{
    adaptive_threshold_inv, apply_closing, apply_opening, smooth, ADAPTIVE_BLOCK_SIZE,
    ADAPTIVE_OFFSET,
};

/// The two views of an input image consumed by the detectors
pub struct PreprocessedImage {
    /// RGB view for the learned detector
    pub color: RgbImage,
    /// Binarized, denoised view for contour extraction
    pub binary: GrayImage,
}

/// Derive the detector inputs from a decoded image
///
/// grayscale → size-scaled Gaussian smoothing → inverted adaptive threshold →
/// 3x3 opening → 3x3 closing. The input is never modified.
pub fn preprocess(image: &DynamicImage) -> PreprocessedImage {
    let color = image.to_rgb8();

    let gray = image.to_luma8();
    let blurred = smooth(&gray);
    let thresholded = adaptive_threshold_inv(&blurred, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
    let opened = apply_opening(&thresholded);
    let binary = apply_closing(&opened);

    tracing::debug!(
        width = color.width(),
        height = color.height(),
        foreground = crate::morphology::count_foreground(&binary),
        "preprocessed image"
    );

    PreprocessedImage { color, binary }
}

/// Shrink an image so its longer side is at most `max_dimension`
pub fn limit_dimensions(image: DynamicImage, max_dimension: Option<u32>) -> DynamicImage {
    match max_dimension {
        Some(max_dim) if image.width().max(image.height()) > max_dim => {
            image.resize(max_dim, max_dim, image::imageops::FilterType::Triangle)
        }
        _ => image,
    }
}
