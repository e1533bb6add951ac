use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};

/// Side of the adaptive threshold neighbourhood
pub const ADAPTIVE_BLOCK_SIZE: u32 = 11;

/// Offset subtracted from the local mean before comparing
pub const ADAPTIVE_OFFSET: i16 = 2;

/// Gaussian sigma equivalent to an odd kernel side
///
/// Uses the usual `0.3 * ((k - 1) / 2 - 1) + 0.8` rule so a kernel side and a
/// sigma can be used interchangeably.
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Smoothing kernel side for an image, scaled with its smaller dimension
///
/// `clamp(3, 7, min(h, w) / 100)`, bumped to the next odd value.
pub fn smoothing_kernel_size(width: u32, height: u32) -> u32 {
    let kernel_size = (width.min(height) / 100).clamp(3, 7);
    if kernel_size % 2 == 1 {
        kernel_size
    } else {
        kernel_size + 1
    }
}

/// Gaussian smoothing with a kernel sized from the image
pub fn smooth(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let kernel_size = smoothing_kernel_size(width, height);
    gaussian_blur_f32(gray, sigma_for_kernel(kernel_size))
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean
///
/// A pixel becomes foreground (255) when it is at least `offset + 1` levels
/// darker than its neighbourhood, background (0) otherwise. Uniform regions
/// therefore always end up as background.
pub fn adaptive_threshold_inv(gray: &GrayImage, block_size: u32, offset: i16) -> GrayImage {
    let local_mean = gaussian_blur_f32(gray, sigma_for_kernel(block_size));
    let (width, height) = gray.dimensions();
    let mut binary = GrayImage::new(width, height);

    for (x, y, pixel) in gray.enumerate_pixels() {
        let threshold = local_mean.get_pixel(x, y)[0] as i16 - offset;
        let value = if pixel[0] as i16 > threshold { 0 } else { 255 };
        binary.put_pixel(x, y, Luma([value]));
    }

    binary
}

/// Morphological opening with a 3x3 square element (removes specks)
pub fn apply_opening(binary: &GrayImage) -> GrayImage {
    open(binary, Norm::LInf, 1)
}

/// Morphological closing with a 3x3 square element applied twice (fills gaps)
///
/// Two dilations followed by two erosions of the 3x3 square equal one closing
/// with a 5x5 square, which is what an L-infinity radius of 2 gives.
pub fn apply_closing(binary: &GrayImage) -> GrayImage {
    close(binary, Norm::LInf, 2)
}

/// Number of foreground pixels in a binary image
pub fn count_foreground(binary: &GrayImage) -> usize {
    binary.pixels().filter(|p| p[0] > 0).count()
}
