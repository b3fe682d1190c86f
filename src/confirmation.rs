//! Confirmation strategies
//!
//! A trigger policy asks a strategy whether a PIR trigger is real. Three
//! interchangeable strategies exist:
//!
//! - [`BurstConfirmation`]: two-phase burst analysis against a reference map
//! - [`StreakConfirmation`]: continuous-mode streak counting over a short capture run
//! - [`DebounceConfirmation`]: N consecutive "ON" readings, no camera involved

use crate::burst::{fallback_verification, BurstVerifier};
use crate::camera::{Camera, CameraSession, CaptureSchedule};
use crate::config::{DetectorConfig, FailPolicy, VerificationConfig};
use crate::continuous::ContinuousDetector;
use crate::error::VerifyError;
use crate::sensor::SensorReading;
use crate::types::{Verdict, Verification, VerificationDetails};
use image::RgbImage;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Decides whether a trigger corresponds to real motion
pub trait ConfirmationStrategy {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// See every decoded sensor reading, including ones the policy ignores
    fn observe(&mut self, _reading: SensorReading) {}

    /// Produce a verdict for the current trigger
    fn verify(&mut self, camera: &mut dyn Camera) -> Verification;
}

/// Strategy selector for deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Burst,
    Streak,
    Debounce,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Burst => "burst",
            StrategyKind::Streak => "streak",
            StrategyKind::Debounce => "debounce",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "burst" => Ok(StrategyKind::Burst),
            "streak" => Ok(StrategyKind::Streak),
            "debounce" => Ok(StrategyKind::Debounce),
            other => Err(format!("unknown confirmation strategy: {other}")),
        }
    }
}

/// Build a boxed strategy from configuration
pub fn build_strategy(
    kind: StrategyKind,
    detector: &DetectorConfig,
    verification: &VerificationConfig,
    debounce_readings: u32,
) -> Result<Box<dyn ConfirmationStrategy>, VerifyError> {
    Ok(match kind {
        StrategyKind::Burst => Box::new(BurstConfirmation::new(detector, verification)?),
        StrategyKind::Streak => Box::new(StreakConfirmation::new(detector, verification)?),
        StrategyKind::Debounce => Box::new(DebounceConfirmation::new(debounce_readings)),
    })
}

/// Burst verification as a strategy
pub struct BurstConfirmation {
    verifier: BurstVerifier,
}

impl BurstConfirmation {
    pub fn new(
        detector: &DetectorConfig,
        verification: &VerificationConfig,
    ) -> Result<Self, VerifyError> {
        Ok(Self {
            verifier: BurstVerifier::new(detector, verification)?,
        })
    }
}

impl ConfirmationStrategy for BurstConfirmation {
    fn name(&self) -> &'static str {
        StrategyKind::Burst.as_str()
    }

    fn verify(&mut self, camera: &mut dyn Camera) -> Verification {
        self.verifier.verify(camera)
    }
}

/// Runs a fresh continuous detector over a bounded capture run and accepts
/// the trigger once its streak confirms
pub struct StreakConfirmation {
    detector_config: DetectorConfig,
    schedule: CaptureSchedule,
    fail_policy: FailPolicy,
}

impl StreakConfirmation {
    pub fn new(
        detector: &DetectorConfig,
        verification: &VerificationConfig,
    ) -> Result<Self, VerifyError> {
        // One extra frame seeds the background before scoring starts
        let frames = 1 + verification.analysis_frames;
        Ok(Self {
            detector_config: detector.clone(),
            schedule: CaptureSchedule::new(frames, verification.analysis_delay()?),
            fail_policy: verification.fail_policy,
        })
    }
}

impl ConfirmationStrategy for StreakConfirmation {
    fn name(&self) -> &'static str {
        StrategyKind::Streak.as_str()
    }

    fn verify(&mut self, camera: &mut dyn Camera) -> Verification {
        let started = Instant::now();
        let mut session = match CameraSession::open(camera) {
            Ok(session) => session,
            Err(e) => {
                return fallback_verification(
                    self.fail_policy,
                    format!("Camera unavailable: {e}"),
                    started.elapsed(),
                )
            }
        };

        let mut detector = ContinuousDetector::new(&self.detector_config);
        let mut frames_analyzed = 0usize;
        let mut peak_streak = 0u32;
        let mut best: Option<(f64, RgbImage)> = None;
        let mut confirmed = false;

        self.schedule.run_until(&mut session, |slot, frame| {
            let analysis = match detector.process(&frame) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(slot, error = %e, "frame skipped");
                    return true;
                }
            };
            if analysis.score.is_some() {
                frames_analyzed += 1;
            }
            peak_streak = peak_streak.max(analysis.streak);
            let confidence = analysis.confidence();
            if confidence > best.as_ref().map_or(0.0, |(c, _)| *c) {
                best = Some((confidence, frame));
            }
            confirmed = analysis.confirmed;
            !confirmed
        });
        drop(session);

        if frames_analyzed == 0 {
            return fallback_verification(
                self.fail_policy,
                "Insufficient frames for streak analysis".to_string(),
                started.elapsed(),
            );
        }

        let max_confidence = best.as_ref().map_or(0.0, |(c, _)| *c);
        let verdict = if confirmed {
            Verdict::Real
        } else {
            Verdict::NotReal
        };
        info!(?verdict, peak_streak, frames_analyzed, "streak verification finished");

        Verification {
            verdict,
            confidence: max_confidence,
            duration: started.elapsed(),
            details: VerificationDetails::Streak {
                frames_analyzed,
                peak_streak,
                max_confidence,
            },
            best_frame: best.map(|(_, frame)| frame),
        }
    }
}

/// Accepts a trigger once the sensor has reported "ON" several times in a row
#[derive(Debug, Clone)]
pub struct DebounceConfirmation {
    required: u32,
    consecutive: u32,
}

impl DebounceConfirmation {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            consecutive: 0,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

impl ConfirmationStrategy for DebounceConfirmation {
    fn name(&self) -> &'static str {
        StrategyKind::Debounce.as_str()
    }

    fn observe(&mut self, reading: SensorReading) {
        match reading {
            SensorReading::On => self.consecutive = self.consecutive.saturating_add(1),
            SensorReading::Off => self.consecutive = 0,
        }
    }

    fn verify(&mut self, _camera: &mut dyn Camera) -> Verification {
        let verdict = if self.consecutive >= self.required {
            Verdict::Real
        } else {
            Verdict::Pending
        };
        debug!(
            consecutive = self.consecutive,
            required = self.required,
            ?verdict,
            "debounce check"
        );

        let confidence = (self.consecutive as f64 / self.required as f64).min(1.0);
        Verification {
            verdict,
            confidence,
            duration: Duration::ZERO,
            details: VerificationDetails::Debounce {
                consecutive_readings: self.consecutive,
                required: self.required,
            },
            best_frame: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::ScriptedCamera;
    use image::Rgb;
    use pretty_assertions::assert_eq;

    fn fast_config() -> VerificationConfig {
        VerificationConfig {
            reference_delay_secs: 0.0,
            analysis_delay_secs: 0.0,
            ..Default::default()
        }
    }

    fn scene_with_object(x0: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(640, 480, Rgb([60, 60, 60]));
        for y in 150..330 {
            for x in x0..x0 + 160 {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        img
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("Burst".parse::<StrategyKind>(), Ok(StrategyKind::Burst));
        assert_eq!(" streak ".parse::<StrategyKind>(), Ok(StrategyKind::Streak));
        assert_eq!("debounce".parse::<StrategyKind>(), Ok(StrategyKind::Debounce));
        assert!("magic".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_build_strategy_names() {
        let detector = DetectorConfig::default();
        let verification = fast_config();
        for kind in [StrategyKind::Burst, StrategyKind::Streak, StrategyKind::Debounce] {
            let strategy = build_strategy(kind, &detector, &verification, 3).unwrap();
            assert_eq!(strategy.name(), kind.as_str());
        }
    }

    #[test]
    fn test_build_strategy_rejects_non_finite_delay() {
        let detector = DetectorConfig::default();
        let verification = VerificationConfig {
            analysis_delay_secs: f64::NAN,
            ..fast_config()
        };
        for kind in [StrategyKind::Burst, StrategyKind::Streak] {
            let built = build_strategy(kind, &detector, &verification, 3);
            assert!(matches!(built, Err(VerifyError::ConfigError(_))));
        }
        // Debounce never touches the camera timing
        assert!(build_strategy(StrategyKind::Debounce, &detector, &verification, 3).is_ok());
    }

    #[test]
    fn test_debounce_requires_consecutive_readings() {
        let mut strategy = DebounceConfirmation::new(3);
        let mut camera = ScriptedCamera::unavailable();

        strategy.observe(SensorReading::On);
        assert_eq!(strategy.verify(&mut camera).verdict, Verdict::Pending);
        strategy.observe(SensorReading::On);
        strategy.observe(SensorReading::Off);
        strategy.observe(SensorReading::On);
        assert_eq!(strategy.verify(&mut camera).verdict, Verdict::Pending);
        strategy.observe(SensorReading::On);
        strategy.observe(SensorReading::On);

        let result = strategy.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::Real);
        assert_eq!(result.confidence, 1.0);
        assert!(!result.is_camera_verified());
        assert_eq!(camera.open_calls, 0);
    }

    #[test]
    fn test_streak_confirms_moving_object() {
        let mut strategy =
            StreakConfirmation::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let mut frames = vec![RgbImage::from_pixel(640, 480, Rgb([60, 60, 60]))];
        for i in 0..10u32 {
            frames.push(scene_with_object(40 + i * 40));
        }
        let mut camera = ScriptedCamera::new(frames);

        let result = strategy.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::Real);
        assert!(result.is_camera_verified());
        assert!(result.best_frame.is_some());
        match result.details {
            VerificationDetails::Streak { peak_streak, .. } => assert!(peak_streak >= 3),
            other => panic!("unexpected details {other:?}"),
        }
        // Stops capturing once confirmed
        assert!(!camera.frames.is_empty());
        assert_eq!(camera.close_calls, 1);
    }

    #[test]
    fn test_streak_rejects_static_scene() {
        let mut strategy =
            StreakConfirmation::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let mut camera =
            ScriptedCamera::new(vec![RgbImage::from_pixel(640, 480, Rgb([60, 60, 60])); 16]);

        let result = strategy.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::NotReal);
        assert!(result.best_frame.is_none());
    }

    #[test]
    fn test_streak_camera_failure_uses_fail_policy() {
        let mut strategy =
            StreakConfirmation::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let result = strategy.verify(&mut ScriptedCamera::unavailable());
        assert_eq!(result.verdict, Verdict::Real);
        assert!(matches!(result.details, VerificationDetails::Skipped { .. }));
    }
}
