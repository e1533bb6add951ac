use std::fs;
use std::path::Path;
use csv::Writer;
use serde::Serialize;

use crate::detection::DetectionMethod;
use crate::errors::Result;
use crate::pipeline::MeasurementOutcome;

/// Image-free summary of an outcome, suitable for CSV and JSON
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MeasurementReport {
    pub file: String,
    pub success: bool,
    pub width_cm: Option<f64>,
    pub height_cm: Option<f64>,
    pub aspect_ratio: Option<f64>,
    pub confidence: Option<f64>,
    pub class_label: Option<String>,
    pub method: Option<DetectionMethod>,
    pub pixels_per_cm: Option<f64>,
    pub processing_ms: Option<u64>,
    pub error: Option<String>,
}

impl MeasurementReport {
    pub fn from_outcome(file: &str, outcome: &MeasurementOutcome) -> Self {
        match outcome {
            MeasurementOutcome::Success(m) => Self {
                file: file.to_string(),
                success: true,
                width_cm: Some(m.dimensions.width_cm),
                height_cm: Some(m.dimensions.height_cm),
                aspect_ratio: Some(m.dimensions.aspect_ratio),
                confidence: m.dimensions.confidence,
                class_label: m.dimensions.class_label.clone(),
                method: Some(m.method),
                pixels_per_cm: Some(m.ratio.pixels_per_cm()),
                processing_ms: Some(m.processing_ms),
                error: None,
            },
            MeasurementOutcome::Failure { reason } => Self {
                file: file.to_string(),
                success: false,
                width_cm: None,
                height_cm: None,
                aspect_ratio: None,
                confidence: None,
                class_label: None,
                method: None,
                pixels_per_cm: None,
                processing_ms: None,
                error: Some(reason.clone()),
            },
        }
    }
}

/// Write measurement reports to `<output_dir>/measurements.csv`
pub fn write_measurements_csv<P: AsRef<Path>>(
    reports: &[MeasurementReport],
    output_dir: P,
) -> Result<()> {
    let output_path = output_dir.as_ref().join("measurements.csv");

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = Writer::from_path(&output_path)?;

    writer.write_record([
        "File",
        "Success",
        "Width_cm",
        "Height_cm",
        "Aspect_Ratio",
        "Confidence",
        "Class",
        "Method",
        "Pixels_per_cm",
        "Processing_ms",
        "Error",
    ])?;

    let opt = |v: Option<f64>, precision: usize| {
        v.map(|v| format!("{:.*}", precision, v)).unwrap_or_default()
    };

    for report in reports {
        writer.write_record([
            report.file.clone(),
            report.success.to_string(),
            opt(report.width_cm, 2),
            opt(report.height_cm, 2),
            opt(report.aspect_ratio, 4),
            opt(report.confidence, 4),
            report.class_label.clone().unwrap_or_default(),
            report.method.map(|m| m.to_string()).unwrap_or_default(),
            opt(report.pixels_per_cm, 2),
            report.processing_ms.map(|ms| ms.to_string()).unwrap_or_default(),
            report.error.clone().unwrap_or_default(),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

/// Pretty JSON array of reports
pub fn reports_to_json(reports: &[MeasurementReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}
