//! Continuous monitoring
//!
//! Runs the streak detector over a live camera without any PIR involvement and
//! emits an event each time motion is confirmed. Each event is consumed right
//! away, so the streak restarts from zero after every emission.

use crate::camera::{Camera, CameraSession};
use crate::config::DetectorConfig;
use crate::continuous::ContinuousDetector;
use crate::error::VerifyError;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive failed reads tolerated before the monitor gives up
pub const DEFAULT_MAX_READ_FAILURES: u32 = 10;

/// One confirmed motion event
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    /// Index of the frame that confirmed the streak
    pub frame_index: u64,
    pub confidence: f64,
    pub streak: u32,
    pub timestamp: DateTime<Utc>,
    pub frame: RgbImage,
}

/// Totals for one monitoring run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub frames_processed: u64,
    pub events: u64,
    pub read_failures: u64,
}

/// Camera-only motion monitor
pub struct MotionMonitor {
    detector: ContinuousDetector,
    interval: Duration,
    max_frames: Option<u64>,
    max_read_failures: u32,
}

impl MotionMonitor {
    pub fn new(config: &DetectorConfig, interval: Duration) -> Self {
        Self {
            detector: ContinuousDetector::new(config),
            interval,
            max_frames: None,
            max_read_failures: DEFAULT_MAX_READ_FAILURES,
        }
    }

    /// Stop after this many capture attempts
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn with_max_read_failures(mut self, failures: u32) -> Self {
        self.max_read_failures = failures.max(1);
        self
    }

    /// Capture and analyse frames until the frame limit, a persistent read
    /// failure, or `on_event` returning `false`
    pub fn run<F>(
        &mut self,
        camera: &mut dyn Camera,
        mut on_event: F,
    ) -> Result<MonitorSummary, VerifyError>
    where
        F: FnMut(&MonitorEvent) -> bool,
    {
        let mut session = CameraSession::open(camera)?;
        let mut summary = MonitorSummary::default();
        let mut consecutive_failures = 0u32;
        let mut attempts = 0u64;

        info!("continuous monitoring started");
        loop {
            if self.max_frames.map_or(false, |max| attempts >= max) {
                break;
            }
            if attempts > 0 && !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
            attempts += 1;

            let frame = match session.read() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(e) => {
                    summary.read_failures += 1;
                    consecutive_failures += 1;
                    warn!(error = %e, consecutive_failures, "frame read failed");
                    if consecutive_failures >= self.max_read_failures {
                        return Err(VerifyError::CaptureError(format!(
                            "{consecutive_failures} consecutive read failures, last: {e}"
                        )));
                    }
                    continue;
                }
            };

            let analysis = match self.detector.process(&frame) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(error = %e, "frame skipped");
                    continue;
                }
            };
            summary.frames_processed += 1;

            if analysis.confirmed {
                let event = MonitorEvent {
                    frame_index: self.detector.frames_seen(),
                    confidence: analysis.confidence(),
                    streak: analysis.streak,
                    timestamp: Utc::now(),
                    frame,
                };
                info!(
                    frame = event.frame_index,
                    confidence = event.confidence,
                    "motion detected"
                );
                self.detector.acknowledge();
                summary.events += 1;
                if !on_event(&event) {
                    break;
                }
            }
        }

        info!(
            frames = summary.frames_processed,
            events = summary.events,
            "continuous monitoring stopped"
        );
        Ok(summary)
    }
}
