use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::errors::{MeasureError, Result};

/// Extensions picked up when scanning an input directory
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Represents an encoded input image with its metadata
pub struct InputImage {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
    pub filename: String,
}

/// A decoded image together with the format it arrived in
#[derive(Debug)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
}

/// Get all supported image files from a directory (recursively)
pub fn get_image_files_in_dir<P: AsRef<Path>>(dir_path: P) -> Result<Vec<PathBuf>> {
    let dir_path = dir_path.as_ref();

    if !dir_path.exists() {
        return Err(MeasureError::InvalidPath(dir_path.to_path_buf()));
    }

    if !dir_path.is_dir() {
        return Err(MeasureError::Config(format!(
            "{} is not a directory", dir_path.display()
        )));
    }

    let mut image_files = Vec::new();
    find_image_files_recursive(dir_path, &mut image_files)?;
    image_files.sort();

    Ok(image_files)
}

fn find_image_files_recursive(dir_path: &Path, result: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();

        if path.is_dir() {
            find_image_files_recursive(&path, result)?;
        } else if path.is_file() && has_image_extension(&path) {
            result.push(path);
        }
    }

    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Read an image file without decoding it
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<InputImage> {
    let path = path.as_ref();

    let filename = path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MeasureError::InvalidPath(path.to_path_buf()))?
        .to_string();

    let bytes = fs::read(path)?;

    Ok(InputImage {
        bytes,
        path: path.to_path_buf(),
        filename,
    })
}

/// Decode encoded bytes, rejecting anything that is not a non-empty raster image
pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage> {
    if bytes.is_empty() {
        return Err(MeasureError::Decode("input is empty".to_string()));
    }

    let format = image::guess_format(bytes).ok();
    let image = image::load_from_memory(bytes)
        .map_err(|e| MeasureError::Decode(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(MeasureError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }

    Ok(DecodedImage { image, format })
}

/// Encode an RGB image, preferring the requested format and falling back to PNG
pub fn encode_image(image: &RgbImage, format: Option<ImageFormat>) -> Result<(Vec<u8>, ImageFormat)> {
    let dynamic = DynamicImage::ImageRgb8(image.clone());

    if let Some(format) = format.filter(|f| *f != ImageFormat::Png) {
        let mut buffer = Cursor::new(Vec::new());
        match dynamic.write_to(&mut buffer, format) {
            Ok(()) => return Ok((buffer.into_inner(), format)),
            Err(e) => {
                tracing::debug!(?format, error = %e, "encoder unavailable, writing PNG instead");
            }
        }
    }

    let mut buffer = Cursor::new(Vec::new());
    dynamic.write_to(&mut buffer, ImageFormat::Png)?;
    Ok((buffer.into_inner(), ImageFormat::Png))
}

/// File extension matching an encoded output format
pub fn extension_for(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("png")
}

/// Write already-encoded bytes to disk
pub fn save_encoded<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        encode_image(&img, Some(ImageFormat::Png)).unwrap().0
    }

    #[test]
    fn decode_reports_format() {
        let decoded = decode_image(&png_bytes(8, 4)).unwrap();
        assert_eq!(decoded.format, Some(ImageFormat::Png));
        assert_eq!(decoded.image.width(), 8);
        assert_eq!(decoded.image.height(), 4);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, MeasureError::Decode(_)));
        assert!(matches!(decode_image(&[]), Err(MeasureError::Decode(_))));
    }

    #[test]
    fn jpeg_input_stays_jpeg() {
        let img = RgbImage::from_pixel(16, 16, Rgb([0, 128, 255]));
        let (bytes, format) = encode_image(&img, Some(ImageFormat::Jpeg)).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(extension_for(format), "jpg");
    }

    #[test]
    fn finds_images_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("a.png"), png_bytes(2, 2)).unwrap();
        fs::write(nested.join("b.JPG"), b"x").unwrap();
        fs::write(nested.join("notes.txt"), b"x").unwrap();

        let files = get_image_files_in_dir(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| has_image_extension(p)));
    }
}
