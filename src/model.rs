//! Learned object detector backends.
//!
//! [`BoxModel`] is the seam between the measurement pipeline and whatever
//! inference runtime produces bounding boxes. With the `learned` feature an
//! `rten` backend for YOLO-style exported models is available.

use image::RgbImage;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{MeasureError, Result};

/// One axis-aligned box predicted by a model, in input-image pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct BoxPrediction {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub label: Option<String>,
}

impl BoxPrediction {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// A loaded, read-only object detection model
pub trait BoxModel: Send + Sync {
    /// Predict boxes for an RGB image; an empty vector means nothing was found
    fn predict(&self, image: &RgbImage) -> Result<Vec<BoxPrediction>>;

    fn name(&self) -> &str;
}

/// COCO class names in model output order
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Name for a class index, when the index is in range
pub fn class_name(index: usize) -> Option<&'static str> {
    COCO_CLASSES.get(index).copied()
}

/// Decode a YOLOv8-style output laid out as `[4 + classes, anchors]`
///
/// Each anchor holds `cx, cy, w, h` in model-input pixels followed by one
/// score per class. Boxes below `score_threshold` are dropped, the rest are
/// scaled back to the source image by `(scale_x, scale_y)`.
pub fn decode_yolo_output(
    output: &[f32],
    rows: usize,
    anchors: usize,
    score_threshold: f32,
    scale: (f32, f32),
) -> Vec<BoxPrediction> {
    if rows <= 4 || output.len() < rows * anchors {
        return Vec::new();
    }
    let at = |row: usize, anchor: usize| output[row * anchors + anchor];

    let mut predictions = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..rows - 4 {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < score_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        predictions.push(BoxPrediction {
            x1: (cx - w / 2.0) * scale.0,
            y1: (cy - h / 2.0) * scale.1,
            x2: (cx + w / 2.0) * scale.0,
            y2: (cy + h / 2.0) * scale.1,
            confidence: best_score.clamp(0.0, 1.0),
            label: class_name(best_class).map(str::to_string),
        });
    }

    predictions
}

/// Load the configured model weights
///
/// Fails when the file is missing or when the crate was built without a
/// learned backend; callers treat failure as "use the contour detector".
pub fn load_box_model(path: &Path, input_size: u32, score_threshold: f32) -> Result<Arc<dyn BoxModel>> {
    if !path.is_file() {
        return Err(MeasureError::Model(format!(
            "model weights not found at {}",
            path.display()
        )));
    }

    load_backend(path, input_size, score_threshold)
}

#[cfg(feature = "learned")]
fn load_backend(path: &Path, input_size: u32, score_threshold: f32) -> Result<Arc<dyn BoxModel>> {
    let model = rten_backend::RtenBoxModel::load(path, input_size, score_threshold)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "learned"))]
fn load_backend(_path: &Path, _input_size: u32, _score_threshold: f32) -> Result<Arc<dyn BoxModel>> {
    Err(MeasureError::Model(
        "built without the `learned` feature, no inference backend available".to_string(),
    ))
}

#[cfg(feature = "learned")]
mod rten_backend {
    use image::imageops::FilterType;
    use image::RgbImage;
    use rten::Model;
    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;
    use std::path::Path;

    use super::{decode_yolo_output, BoxModel, BoxPrediction};
    use crate::errors::{MeasureError, Result};

    /// YOLO-style detector executed with rten
    pub struct RtenBoxModel {
        model: Model,
        input_size: u32,
        score_threshold: f32,
        name: String,
    }

    impl RtenBoxModel {
        pub fn load(path: &Path, input_size: u32, score_threshold: f32) -> Result<Self> {
            let model = Model::load_file(path)
                .map_err(|e| MeasureError::Model(format!("failed to load {}: {}", path.display(), e)))?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("rten-model")
                .to_string();

            tracing::info!(model = %name, input_size, "learned detector loaded");

            Ok(Self {
                model,
                input_size,
                score_threshold,
                name,
            })
        }
    }

    impl BoxModel for RtenBoxModel {
        fn predict(&self, image: &RgbImage) -> Result<Vec<BoxPrediction>> {
            let size = self.input_size;
            let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

            let side = size as usize;
            let mut input = NdTensor::<f32, 4>::zeros([1, 3, side, side]);
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
                }
            }

            let output = self
                .model
                .run_one(input.view().into(), None)
                .map_err(|e| MeasureError::Model(format!("inference failed: {}", e)))?;
            let output: NdTensor<f32, 3> = output
                .try_into()
                .map_err(|e| MeasureError::Model(format!("unexpected output tensor: {:?}", e)))?;

            let [_, rows, anchors] = output.shape();
            let data = output.to_vec();
            let scale = (
                image.width() as f32 / size as f32,
                image.height() as f32 / size as f32,
            );

            Ok(decode_yolo_output(&data, rows, anchors, self.score_threshold, scale))
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
