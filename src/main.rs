use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use rayon::prelude::*;
use tracing_subscriber::prelude::*;

use object_dimension_lib::image_io::{extension_for, save_encoded};
use object_dimension_lib::{
    calibrate_from_reference, get_image_files_in_dir, load_image, reports_to_json,
    write_measurements_csv, Config, MeasureError, MeasurementOutcome, MeasurementPipeline,
    MeasurementReport, MeasurementService,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Object dimension estimation from captured images")]
struct Args {
    /// Path to input image or directory
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Calibration ratio in pixels per centimeter (overrides config)
    #[clap(short = 'p', long, allow_negative_numbers = true)]
    pixels_per_cm: Option<f64>,

    /// Object detection model weights (overrides config)
    #[clap(short, long)]
    model: Option<String>,

    /// Font used for annotation labels (overrides config)
    #[clap(long)]
    font: Option<String>,

    /// Calibrate from an image of a reference object and exit
    #[clap(long, value_name = "REFERENCE_IMAGE")]
    calibrate: Option<PathBuf>,

    /// Physical width of the reference object in centimeters
    #[clap(long, allow_negative_numbers = true)]
    reference_width: Option<f64>,

    /// Print results as JSON to stdout
    #[clap(long)]
    json: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let level = if debug { "debug" } else { "info" };

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("object_dimension_lib={}", level).parse()?)
        .add_directive(format!("object_dimension_cli={}", level).parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(())
}

/// Measure one file and save its annotated image
fn process_file(
    path: &Path,
    service: &MeasurementService,
    config: &Config,
    annotated_dir: &Path,
) -> MeasurementReport {
    let input = match load_image(path) {
        Ok(input) => input,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read image");
            let name = path.display().to_string();
            return MeasurementReport::from_outcome(&name, &MeasurementOutcome::failure(e.to_string()));
        }
    };

    tracing::info!(file = %input.path.display(), "processing");
    let outcome = service.measure(input.bytes, config.pixels_per_cm);

    if let (true, Some(measurement)) = (config.save_annotated, outcome.measurement()) {
        let target = annotated_dir.join(format!(
            "{}_annotated.{}",
            input.filename,
            extension_for(measurement.annotated_format)
        ));
        if let Err(e) = save_encoded(&measurement.annotated_image, &target) {
            tracing::error!(path = %target.display(), error = %e, "failed to save annotated image");
        }
    }

    let file_name = input
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(input.filename);
    MeasurementReport::from_outcome(&file_name, &outcome)
}

/// Override config with command-line arguments
///
/// Unusable calibration values are replaced by their defaults here rather
/// than rejected.
fn apply_overrides(args: &Args, config: &mut Config) {
    if let Some(input) = args.input.clone() {
        config.input_path = input;
    }
    if let Some(output) = args.output.clone() {
        config.output_base_dir = output;
    }
    if args.pixels_per_cm.is_some() {
        config.pixels_per_cm = args.pixels_per_cm;
    }
    if args.model.is_some() {
        config.model_path = args.model.clone();
    }
    if args.font.is_some() {
        config.font_path = args.font.clone();
    }
    if let Some(width) = args.reference_width {
        config.reference_width_cm = width;
    }

    config.normalize_calibration();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug)?;

    let mut config = Config::from_file_or_default(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    apply_overrides(&args, &mut config);
    config.validate_parameters()?;

    let pipeline = Arc::new(MeasurementPipeline::from_config(&config));

    if let Some(reference) = args.calibrate {
        let bytes = fs::read(&reference)
            .with_context(|| format!("reading reference image {}", reference.display()))?;
        let ratio = calibrate_from_reference(&bytes, config.reference_width_cm, pipeline.detector())?;
        println!("{:.4}", ratio.pixels_per_cm());
        return Ok(());
    }

    config.validate()?;

    let start_time = Instant::now();
    let service = MeasurementService::from_config(Arc::clone(&pipeline), &config)?;

    let output_base = PathBuf::from(&config.output_base_dir);
    let annotated_dir = output_base.join("annotated");
    let input_path = PathBuf::from(&config.input_path);

    let files = if input_path.is_file() {
        vec![input_path]
    } else if input_path.is_dir() {
        let files = get_image_files_in_dir(&input_path)?;
        tracing::info!(count = files.len(), dir = %input_path.display(), "found images");
        files
    } else {
        return Err(MeasureError::InvalidPath(input_path).into());
    };

    let reports: Vec<MeasurementReport> = if config.use_parallel {
        files
            .par_iter()
            .map(|path| process_file(path, &service, &config, &annotated_dir))
            .collect()
    } else {
        files
            .iter()
            .map(|path| process_file(path, &service, &config, &annotated_dir))
            .collect()
    };

    write_measurements_csv(&reports, &output_base)?;

    if args.json {
        println!("{}", reports_to_json(&reports)?);
    }

    let succeeded = reports.iter().filter(|r| r.success).count();
    tracing::info!(
        succeeded,
        failed = reports.len() - succeeded,
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "processing completed"
    );

    Ok(())
}
