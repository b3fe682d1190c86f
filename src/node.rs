//! Fog node event loop
//!
//! One synchronous loop: wait for the next sensor token with a bounded
//! timeout, feed it to the [`TriggerPolicy`], run the confirmation strategy
//! inline when a trigger is accepted and upload the event if it is real.
//! Readings that arrive while a verification runs are drained afterwards and
//! only update the recorded line state, so they never start a verification of
//! their own. The loop ends only when the sensor stream closes.

use crate::camera::Camera;
use crate::config::FogConfig;
use crate::confirmation::ConfirmationStrategy;
use crate::error::VerifyError;
use crate::policy::{IgnoreReason, PolicyState, TriggerAction, TriggerPolicy};
use crate::sensor::{SensorEvent, SensorReading, SensorSource};
use crate::types::{Verdict, Verification};
use crate::upload::{EventEncoder, EventSink, UploadOutcome};
use chrono::Utc;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What one sensor reading led to
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Ignored(IgnoreReason),
    /// Verification judged the trigger a false positive
    Rejected(Verification),
    /// Not enough evidence yet; the trigger stays open
    Pending(Verification),
    /// Real motion; the event was handed to the sink
    Confirmed {
        verification: Verification,
        upload: UploadOutcome,
    },
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub readings: u64,
    pub malformed: u64,
    pub timeouts: u64,
    pub ignored: u64,
    pub verifications: u64,
    pub confirmed: u64,
    pub rejected: u64,
    pub pending: u64,
    pub uploads_delivered: u64,
    pub upload_failures: u64,
    /// Readings that arrived during a verification and were only recorded
    pub discarded: u64,
}

impl RunStats {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Ignored(_) => self.ignored += 1,
            StepOutcome::Rejected(_) => {
                self.verifications += 1;
                self.rejected += 1;
            }
            StepOutcome::Pending(_) => {
                self.verifications += 1;
                self.pending += 1;
            }
            StepOutcome::Confirmed { upload, .. } => {
                self.verifications += 1;
                self.confirmed += 1;
                match upload {
                    UploadOutcome::Delivered { .. } => self.uploads_delivered += 1,
                    UploadOutcome::NotConfigured => {}
                    UploadOutcome::Rejected { .. } | UploadOutcome::Failed(_) => {
                        self.upload_failures += 1
                    }
                }
            }
        }
    }
}

/// Sensor-driven verification node
pub struct FogNode {
    policy: TriggerPolicy,
    strategy: Box<dyn ConfirmationStrategy>,
    camera: Box<dyn Camera>,
    sink: Box<dyn EventSink>,
    encoder: EventEncoder,
    sensor_timeout: Duration,
    stats: RunStats,
}

impl FogNode {
    pub fn new(
        config: &FogConfig,
        strategy: Box<dyn ConfirmationStrategy>,
        camera: Box<dyn Camera>,
        sink: Box<dyn EventSink>,
    ) -> Result<Self, VerifyError> {
        Ok(Self {
            policy: TriggerPolicy::new(config.node.cooldown()?),
            strategy,
            camera,
            sink,
            encoder: EventEncoder::new(&config.node.sensor_id, &config.upload, &config.detector),
            sensor_timeout: config.node.sensor_timeout()?,
            stats: RunStats::default(),
        })
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Process one decoded reading observed at `now`
    pub fn handle_reading(&mut self, reading: SensorReading, now: Instant) -> StepOutcome {
        self.stats.readings += 1;
        self.strategy.observe(reading);

        let outcome = match self.policy.on_reading(reading, now) {
            TriggerAction::Ignore(reason) => {
                debug!(reading = reading.as_str(), ?reason, "reading ignored");
                StepOutcome::Ignored(reason)
            }
            TriggerAction::Verify | TriggerAction::Reverify => self.verify(now),
        };
        self.stats.record(&outcome);
        outcome
    }

    fn verify(&mut self, now: Instant) -> StepOutcome {
        let triggered_at = Utc::now();
        info!(strategy = self.strategy.name(), "motion trigger, verifying");

        let verification = self.strategy.verify(self.camera.as_mut());
        let state = self
            .policy
            .resolve(verification.verdict, now + verification.duration);

        match verification.verdict {
            Verdict::Real => {
                info!(
                    confidence = verification.confidence,
                    verified = verification.is_camera_verified(),
                    details = %verification.describe(),
                    "motion confirmed"
                );
                // Fail-open and debounce events have no best frame and go out without an image
                let payload = self.encoder.encode(&verification, triggered_at);
                // The cooldown is already set; the upload result cannot change it
                let upload = self.sink.publish(&payload);
                debug_assert_eq!(state, PolicyState::Cooldown);
                StepOutcome::Confirmed {
                    verification,
                    upload,
                }
            }
            Verdict::NotReal => {
                info!(details = %verification.describe(), "false positive filtered");
                StepOutcome::Rejected(verification)
            }
            Verdict::Pending => {
                debug!(details = %verification.describe(), "verification pending");
                StepOutcome::Pending(verification)
            }
        }
    }

    /// Process one event from the sensor source
    pub fn handle_event(&mut self, event: SensorEvent, now: Instant) -> Option<StepOutcome> {
        match event {
            SensorEvent::Reading(reading) => Some(self.handle_reading(reading, now)),
            SensorEvent::Malformed(line) => {
                self.stats.malformed += 1;
                warn!(%line, "malformed sensor line skipped");
                None
            }
            SensorEvent::Timeout => {
                self.stats.timeouts += 1;
                None
            }
            SensorEvent::Closed => None,
        }
    }

    /// Record readings that arrived while a verification ran. They update the
    /// line state and the strategy but never start a verification.
    pub fn discard_arrivals(&mut self, sensor: &mut dyn SensorSource) {
        for event in sensor.drain() {
            match event {
                SensorEvent::Reading(reading) => {
                    self.stats.readings += 1;
                    self.stats.discarded += 1;
                    self.strategy.observe(reading);
                    self.policy.record_line_state(reading);
                    debug!(reading = reading.as_str(), "reading arrived during verification");
                }
                SensorEvent::Malformed(line) => {
                    self.stats.malformed += 1;
                    warn!(%line, "malformed sensor line skipped");
                }
                SensorEvent::Timeout | SensorEvent::Closed => {}
            }
        }
    }

    /// Run until the sensor stream closes
    pub fn run(&mut self, sensor: &mut dyn SensorSource) -> RunStats {
        info!(
            camera = %self.camera.describe(),
            strategy = self.strategy.name(),
            "fog node running, waiting for motion"
        );
        loop {
            let event = sensor.next_event(self.sensor_timeout);
            if event == SensorEvent::Closed {
                info!("sensor stream closed, stopping");
                break;
            }
            // A pending trigger stays open, so its follow-up readings still count
            if let Some(StepOutcome::Confirmed { .. } | StepOutcome::Rejected(_)) =
                self.handle_event(event, Instant::now())
            {
                self.discard_arrivals(sensor);
            }
        }
        self.stats.clone()
    }
}
