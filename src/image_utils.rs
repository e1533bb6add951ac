use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use std::fs;
use std::path::Path;

use crate::errors::{MeasureError, Result};

/// Outline color for measured regions
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Outline thickness in pixels
pub const OUTLINE_THICKNESS: i32 = 2;

/// Label baseline position and glyph height
pub const LABEL_ORIGIN: (i32, i32) = (10, 30);
pub const LABEL_SCALE: f32 = 26.0;

/// DejaVu Sans, used for labels when no font is configured
const DEFAULT_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// The embedded label font
pub fn default_font() -> Result<FontArc> {
    FontArc::try_from_slice(DEFAULT_FONT)
        .map_err(|e| MeasureError::Other(format!("embedded font is invalid: {}", e)))
}

/// Load a TrueType/OpenType font for annotation labels
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    FontArc::try_from_vec(bytes).map_err(|e| {
        MeasureError::Config(format!("Invalid font file '{}': {}", path.display(), e))
    })
}

/// Draw a closed polygon outline with the given thickness
///
/// Thickness is produced by redrawing the outline shifted by whole pixels,
/// which is enough for the thin strokes used on result images.
pub fn draw_polygon_outline(
    image: &mut RgbImage,
    corners: &[(f64, f64)],
    color: Rgb<u8>,
    thickness: i32,
) {
    if corners.len() < 2 {
        return;
    }

    let offsets: Vec<(f32, f32)> = (0..thickness.max(1))
        .flat_map(|dy| (0..thickness.max(1)).map(move |dx| (dx as f32, dy as f32)))
        .collect();

    for i in 0..corners.len() {
        let (x1, y1) = corners[i];
        let (x2, y2) = corners[(i + 1) % corners.len()];
        for &(dx, dy) in &offsets {
            draw_line_segment_mut(
                image,
                (x1 as f32 + dx, y1 as f32 + dy),
                (x2 as f32 + dx, y2 as f32 + dy),
                color,
            );
        }
    }
}

/// Draw a single line of text whose baseline sits at `LABEL_ORIGIN`
pub fn draw_label(image: &mut RgbImage, font: &FontArc, text: &str, color: Rgb<u8>) {
    let (x, baseline) = LABEL_ORIGIN;
    let scale = PxScale::from(LABEL_SCALE);
    // imageproc positions text by the top of its ascent
    let ascent = font.as_scaled(scale).ascent();
    let top = (baseline as f32 - ascent).round() as i32;
    draw_text_mut(image, color, x, top.max(0), scale, font, text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_marks_rectangle_edges() {
        let mut image = RgbImage::new(50, 50);
        let corners = [(10.0, 10.0), (40.0, 10.0), (40.0, 30.0), (10.0, 30.0)];
        draw_polygon_outline(&mut image, &corners, OUTLINE_COLOR, OUTLINE_THICKNESS);

        assert_eq!(image.get_pixel(25, 10), &OUTLINE_COLOR);
        assert_eq!(image.get_pixel(25, 11), &OUTLINE_COLOR);
        assert_eq!(image.get_pixel(40, 20), &OUTLINE_COLOR);
        assert_eq!(image.get_pixel(25, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn outline_clips_at_image_border() {
        let mut image = RgbImage::new(20, 20);
        let corners = [(-5.0, -5.0), (30.0, -5.0), (30.0, 30.0), (-5.0, 30.0)];
        draw_polygon_outline(&mut image, &corners, OUTLINE_COLOR, OUTLINE_THICKNESS);
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn label_is_drawn_at_top_left() {
        let mut image = RgbImage::new(300, 120);
        let font = default_font().unwrap();
        draw_label(&mut image, &font, "Class: unknown (0.70)", OUTLINE_COLOR);

        let (x0, baseline) = LABEL_ORIGIN;
        let inked: Vec<(u32, u32)> = image
            .enumerate_pixels()
            .filter(|(_, _, p)| p[1] > 0)
            .map(|(x, y, _)| (x, y))
            .collect();

        assert!(inked.len() > 100);
        assert!(inked.iter().all(|&(x, y)| x + 2 >= x0 as u32 && y <= baseline as u32 + 8));
        assert!(inked.iter().any(|&(x, y)| x < x0 as u32 + 20 && y + 12 >= baseline as u32));
    }

    #[test]
    fn missing_font_is_an_error() {
        assert!(load_font("/nonexistent/font.ttf").is_err());
    }

    #[test]
    fn garbage_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ttf");
        fs::write(&path, b"not a font").unwrap();
        assert!(matches!(load_font(&path), Err(MeasureError::Config(_))));
    }
}
