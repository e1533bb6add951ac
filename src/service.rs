//! Bounded worker pool in front of the synchronous pipeline.
//!
//! Each request runs on a fixed-size rayon pool while the caller waits for at
//! most the configured timeout. A request that overruns is reported as a
//! failure; its job keeps running and the late result is dropped.

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::Config;
use crate::errors::{MeasureError, Result};
use crate::pipeline::{MeasurementOutcome, MeasurementPipeline};

/// Source of encoded frames, e.g. a camera owned by the transport layer
pub trait FrameSource: Send + Sync {
    /// The next frame, or `None` when nothing could be captured right now
    fn next_frame(&self) -> Option<Vec<u8>>;
}

/// Frame source that re-reads a still image from disk
///
/// Reads are serialized through a mutex and retried a few times, the way a
/// capture device would be.
pub struct StillImageSource {
    path: Mutex<PathBuf>,
    attempts: u32,
    retry_delay: Duration,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(path.into()),
            attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&self) -> Option<Vec<u8>> {
        let path = match self.path.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for attempt in 1..=self.attempts {
            match fs::read(&*path) {
                Ok(bytes) if !bytes.is_empty() => return Some(bytes),
                Ok(_) => tracing::warn!(attempt, path = %path.display(), "empty frame"),
                Err(e) => tracing::warn!(attempt, path = %path.display(), error = %e, "frame read failed"),
            }
            if attempt < self.attempts {
                thread::sleep(self.retry_delay);
            }
        }

        tracing::error!(path = %path.display(), "failed to capture frame");
        None
    }
}

/// Runs measurements on a bounded pool with a per-request timeout
pub struct MeasurementService {
    pipeline: Arc<MeasurementPipeline>,
    pool: ThreadPool,
    timeout: Duration,
}

impl MeasurementService {
    pub fn new(pipeline: Arc<MeasurementPipeline>, workers: usize, timeout: Duration) -> Result<Self> {
        if workers == 0 {
            return Err(MeasureError::Config("worker count must be > 0".to_string()));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("measure-worker-{}", i))
            .build()
            .map_err(|e| MeasureError::Other(format!("failed to start worker pool: {}", e)))?;

        tracing::info!(workers, timeout_secs = timeout.as_secs_f64(), "measurement service started");

        Ok(Self {
            pipeline,
            pool,
            timeout,
        })
    }

    pub fn from_config(pipeline: Arc<MeasurementPipeline>, config: &Config) -> Result<Self> {
        Self::new(pipeline, config.worker_count, Duration::from_secs(config.timeout_secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Measure on the pool, waiting at most the configured timeout
    pub fn measure(&self, image_bytes: Vec<u8>, pixels_per_cm: Option<f64>) -> MeasurementOutcome {
        let (tx, rx) = mpsc::sync_channel(1);
        let pipeline = Arc::clone(&self.pipeline);

        self.pool.spawn(move || {
            let outcome = pipeline.estimate_dimensions(&image_bytes, pixels_per_cm);
            // the receiver is gone once the caller has timed out
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let e = MeasureError::Timeout(self.timeout);
                tracing::error!(error = %e, "measurement abandoned");
                MeasurementOutcome::failure(e.to_string())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                MeasurementOutcome::failure("measurement worker stopped without a result")
            }
        }
    }

    /// Measure whatever frame the source currently provides
    pub fn measure_frame(&self, source: &dyn FrameSource, pixels_per_cm: Option<f64>) -> MeasurementOutcome {
        match source.next_frame() {
            Some(frame) => self.measure(frame, pixels_per_cm),
            None => MeasurementOutcome::failure("No frame available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionCandidate, DetectionMethod, Detector};
    use crate::image_io::encode_image;
    use image::{GrayImage, ImageFormat, RgbImage};

    struct SlowDetector(Duration);

    impl Detector for SlowDetector {
        fn detect(&self, _color: &RgbImage, _binary: &GrayImage) -> Result<Vec<DetectionCandidate>> {
            thread::sleep(self.0);
            Ok(Vec::new())
        }

        fn method(&self) -> DetectionMethod {
            DetectionMethod::Contour
        }
    }

    struct NoFrames;

    impl FrameSource for NoFrames {
        fn next_frame(&self) -> Option<Vec<u8>> {
            None
        }
    }

    fn blank_png() -> Vec<u8> {
        encode_image(&RgbImage::new(64, 64), Some(ImageFormat::Png)).unwrap().0
    }

    fn service(detector_delay: Duration, timeout: Duration) -> MeasurementService {
        let pipeline = MeasurementPipeline::new(Arc::new(SlowDetector(detector_delay)));
        MeasurementService::new(Arc::new(pipeline), 2, timeout).unwrap()
    }

    #[test]
    fn timeout_is_a_failure() {
        let service = service(Duration::from_millis(500), Duration::from_millis(50));
        let outcome = service.measure(blank_png(), None);
        assert!(outcome.failure_reason().unwrap().contains("timed out"));
    }

    #[test]
    fn result_within_timeout_is_returned() {
        let service = service(Duration::from_millis(0), Duration::from_secs(10));
        let outcome = service.measure(blank_png(), None);
        assert_eq!(outcome.failure_reason(), Some("No objects detected"));
    }

    #[test]
    fn missing_frame_is_a_failure() {
        let service = service(Duration::from_millis(0), Duration::from_secs(1));
        let outcome = service.measure_frame(&NoFrames, None);
        assert_eq!(outcome.failure_reason(), Some("No frame available"));
    }

    #[test]
    fn still_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        fs::write(&path, blank_png()).unwrap();

        let source = StillImageSource::new(&path);
        assert_eq!(source.next_frame(), Some(blank_png()));

        let missing = StillImageSource {
            path: Mutex::new(dir.path().join("missing.png")),
            attempts: 2,
            retry_delay: Duration::from_millis(1),
        };
        assert!(missing.next_frame().is_none());
    }

    #[test]
    fn zero_workers_rejected() {
        let pipeline = Arc::new(MeasurementPipeline::new(Arc::new(SlowDetector(Duration::ZERO))));
        assert!(MeasurementService::new(pipeline, 0, Duration::from_secs(1)).is_err());
    }
}
