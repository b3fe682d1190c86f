//! Burst verification
//!
//! Invoked once per PIR trigger. A reference phase averages a few frames into
//! an adaptive reference map; an analysis phase scores a fixed number of
//! frames against it, adapting the reference after each one so slow lighting
//! drift during the burst does not accumulate. The per-frame scores are then
//! aggregated into a single verdict.
//!
//! The verdict needs enough frames above the threshold, a strong peak and a
//! not-too-low average. A single bright reflection produces a peak but no
//! count; motion that only fills part of the burst still passes.

use crate::background::BackgroundModel;
use crate::camera::{Camera, CameraSession, CaptureSchedule};
use crate::config::{DetectorConfig, FailPolicy, VerificationConfig};
use crate::error::VerifyError;
use crate::preprocess::Preprocessor;
use crate::scorer::FrameScorer;
use crate::types::{BurstSummary, Verdict, Verification, VerificationDetails};
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Thresholds applied to the aggregated burst scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionCriteria {
    /// Per-frame score counted as "above threshold"; also the peak requirement
    pub confidence_threshold: f64,
    /// Frames above threshold needed
    pub min_frames_above: usize,
    /// The average must reach `average_factor * confidence_threshold`
    pub average_factor: f64,
}

impl DecisionCriteria {
    pub fn new(detector: &DetectorConfig, verification: &VerificationConfig) -> Self {
        Self {
            confidence_threshold: detector.confidence_threshold,
            min_frames_above: detector.min_motion_frames as usize,
            average_factor: verification.average_factor,
        }
    }

    pub fn is_real(&self, summary: &BurstSummary) -> bool {
        summary.frames_above_threshold >= self.min_frames_above
            && summary.max_score >= self.confidence_threshold
            && summary.avg_score >= self.average_factor * self.confidence_threshold
    }
}

fn median(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// State of one verification attempt
#[derive(Debug, Default)]
pub struct VerificationSession {
    reference_frames: usize,
    scores: Vec<f64>,
    best: Option<(f64, RgbImage)>,
}

impl VerificationSession {
    pub fn new(reference_frames: usize) -> Self {
        Self {
            reference_frames,
            ..Default::default()
        }
    }

    /// Record an analysis frame's score; keeps the strictly best frame
    pub fn record(&mut self, score: f64, frame: RgbImage) {
        self.scores.push(score);
        let better = match &self.best {
            Some((best, _)) => score > *best,
            None => score > 0.0,
        };
        if better {
            self.best = Some((score, frame));
        }
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Aggregate the recorded scores
    pub fn summarize(&self, threshold: f64) -> BurstSummary {
        let frames_analyzed = self.scores.len();
        let (max_score, avg_score) = if frames_analyzed == 0 {
            (0.0, 0.0)
        } else {
            (
                self.scores.iter().copied().fold(0.0, f64::max),
                self.scores.iter().sum::<f64>() / frames_analyzed as f64,
            )
        };
        BurstSummary {
            reference_frames: self.reference_frames,
            frames_analyzed,
            frames_above_threshold: self.scores.iter().filter(|&&s| s >= threshold).count(),
            max_score,
            avg_score,
            median_score: median(&self.scores),
        }
    }

    /// Close the session into a verification result
    pub fn finish(self, criteria: &DecisionCriteria, duration: Duration) -> Verification {
        let summary = self.summarize(criteria.confidence_threshold);
        let verdict = if criteria.is_real(&summary) {
            Verdict::Real
        } else {
            Verdict::NotReal
        };
        Verification {
            verdict,
            confidence: summary.max_score,
            duration,
            details: VerificationDetails::Burst(summary),
            best_frame: self.best.map(|(_, frame)| frame),
        }
    }
}

/// Blend frames sequentially with equal weights: `acc = 0.5 * acc + 0.5 * next`
pub fn blend_reference(frames: &[RgbImage]) -> Option<RgbImage> {
    let (first, rest) = frames.split_first()?;
    let (width, height) = first.dimensions();
    let mut acc: Vec<f32> = first.as_raw().iter().map(|&p| p as f32).collect();
    for frame in rest {
        if frame.dimensions() != (width, height) {
            continue;
        }
        for (a, &p) in acc.iter_mut().zip(frame.as_raw().iter()) {
            *a = 0.5 * *a + 0.5 * p as f32;
        }
    }
    Some(RgbImage::from_fn(width, height, |x, y| {
        let i = (y as usize * width as usize + x as usize) * 3;
        Rgb([
            acc[i].round() as u8,
            acc[i + 1].round() as u8,
            acc[i + 2].round() as u8,
        ])
    }))
}

/// Build the result returned when verification cannot run
pub fn fallback_verification(
    policy: FailPolicy,
    reason: String,
    duration: Duration,
) -> Verification {
    let verdict = match policy {
        FailPolicy::Open => Verdict::Real,
        FailPolicy::Closed => Verdict::NotReal,
    };
    warn!(policy = policy.as_str(), %reason, "verification skipped");
    Verification {
        verdict,
        confidence: 0.0,
        duration,
        details: VerificationDetails::Skipped { reason },
        best_frame: None,
    }
}

/// Two-phase burst verifier
#[derive(Debug, Clone)]
pub struct BurstVerifier {
    config: VerificationConfig,
    reference_schedule: CaptureSchedule,
    analysis_schedule: CaptureSchedule,
    criteria: DecisionCriteria,
    preprocessor: Preprocessor,
    scorer: FrameScorer,
}

impl BurstVerifier {
    pub fn new(
        detector: &DetectorConfig,
        config: &VerificationConfig,
    ) -> Result<Self, VerifyError> {
        Ok(Self {
            config: config.clone(),
            reference_schedule: CaptureSchedule::new(
                config.reference_frames,
                config.reference_delay()?,
            ),
            analysis_schedule: CaptureSchedule::new(
                config.analysis_frames,
                config.analysis_delay()?,
            ),
            criteria: DecisionCriteria::new(detector, config),
            preprocessor: Preprocessor::new(detector),
            scorer: FrameScorer::new(detector),
        })
    }

    pub fn criteria(&self) -> &DecisionCriteria {
        &self.criteria
    }

    /// Run one verification burst on the camera
    pub fn verify(&self, camera: &mut dyn Camera) -> Verification {
        let started = Instant::now();

        let mut session = match CameraSession::open(camera) {
            Ok(session) => session,
            Err(e) => {
                return fallback_verification(
                    self.config.fail_policy,
                    format!("Camera unavailable: {e}"),
                    started.elapsed(),
                )
            }
        };

        let mut references = Vec::with_capacity(self.config.reference_frames);
        self.reference_schedule.run(&mut session, |_, frame| {
            match self.preprocessor.normalize_color(&frame) {
                Ok(normalized) => references.push(normalized),
                Err(e) => warn!(error = %e, "reference frame rejected"),
            }
        });

        if references.len() < self.config.min_reference_frames {
            return fallback_verification(
                self.config.fail_policy,
                format!(
                    "Insufficient reference frames: captured {} of {}",
                    references.len(),
                    self.config.reference_frames
                ),
                started.elapsed(),
            );
        }

        let mut reference = match self.build_reference(&references) {
            Ok(reference) => reference,
            Err(e) => {
                return fallback_verification(
                    self.config.fail_policy,
                    format!("Reference map failed: {e}"),
                    started.elapsed(),
                )
            }
        };

        let mut verification = VerificationSession::new(references.len());
        self.analysis_schedule.run(&mut session, |slot, frame| {
            let gray = match self.preprocessor.preprocess(&frame) {
                Ok(gray) => gray,
                Err(e) => {
                    warn!(slot, error = %e, "analysis frame rejected");
                    return;
                }
            };
            let score = match self.scorer.score_burst(&gray, &reference) {
                Ok(score) => score,
                Err(e) => {
                    warn!(slot, error = %e, "analysis frame not scored");
                    return;
                }
            };
            if let Err(e) = reference.update(
                &gray,
                self.config.reference_retain,
                self.config.reference_learn,
            ) {
                warn!(slot, error = %e, "reference adaptation failed");
            }
            verification.record(score.score, frame);
        });
        drop(session);

        let result = verification.finish(&self.criteria, started.elapsed());
        info!(
            verdict = ?result.verdict,
            confidence = result.confidence,
            elapsed_ms = result.duration.as_millis() as u64,
            "{}",
            result.describe()
        );
        result
    }

    fn build_reference(&self, frames: &[RgbImage]) -> Result<BackgroundModel, VerifyError> {
        let blended = blend_reference(frames)
            .ok_or_else(|| VerifyError::CaptureError("no reference frames".to_string()))?;
        let gray = self.preprocessor.preprocess(&blended)?;
        Ok(BackgroundModel::from_frame(&gray))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::ScriptedCamera;
    use pretty_assertions::assert_eq;

    fn fast_config() -> VerificationConfig {
        VerificationConfig {
            reference_delay_secs: 0.0,
            analysis_delay_secs: 0.0,
            ..Default::default()
        }
    }

    fn criteria() -> DecisionCriteria {
        DecisionCriteria::new(&DetectorConfig::default(), &VerificationConfig::default())
    }

    fn tagged(v: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, Rgb([v, v, v]))
    }

    fn scene(value: u8) -> RgbImage {
        RgbImage::from_pixel(640, 480, Rgb([value, value, value]))
    }

    fn scene_with_object(x0: u32) -> RgbImage {
        let mut img = scene(60);
        for y in 150..330 {
            for x in x0..x0 + 160 {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        img
    }

    #[test]
    fn test_all_zero_scores_are_not_real() {
        let mut session = VerificationSession::new(5);
        for i in 0..15 {
            session.record(0.0, tagged(i));
        }
        let result = session.finish(&criteria(), Duration::ZERO);

        assert_eq!(result.verdict, Verdict::NotReal);
        assert!(result.best_frame.is_none());
        match result.details {
            VerificationDetails::Burst(summary) => {
                assert_eq!(summary.frames_above_threshold, 0);
                assert_eq!(summary.frames_analyzed, 15);
                assert_eq!(summary.max_score, 0.0);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_strong_burst_is_real_and_keeps_best_frame() {
        let scores = [
            0.1, 0.2, 0.65, 0.7, 0.9, 0.62, 0.3, 0.1, 0.0, 0.2, 0.4, 0.1, 0.0, 0.1, 0.2,
        ];
        let mut session = VerificationSession::new(5);
        for (i, &s) in scores.iter().enumerate() {
            session.record(s, tagged(i as u8));
        }
        let summary = session.summarize(0.6);
        assert_eq!(summary.frames_above_threshold, 4);
        assert!(summary.avg_score >= 0.24);

        let result = session.finish(&criteria(), Duration::ZERO);
        assert_eq!(result.verdict, Verdict::Real);
        assert_eq!(result.confidence, 0.9);
        let best = result.best_frame.expect("best frame");
        assert_eq!(best.get_pixel(0, 0)[0], 4);
    }

    #[test]
    fn test_single_spike_is_rejected() {
        let mut session = VerificationSession::new(5);
        for i in 0..15 {
            session.record(if i == 7 { 0.95 } else { 0.05 }, tagged(i));
        }
        let result = session.finish(&criteria(), Duration::ZERO);
        assert_eq!(result.verdict, Verdict::NotReal);
        assert!(result.best_frame.is_some());
    }

    #[test]
    fn test_low_average_is_rejected() {
        let c = criteria();
        let summary = BurstSummary {
            reference_frames: 5,
            frames_analyzed: 15,
            frames_above_threshold: 3,
            max_score: 0.9,
            avg_score: 0.2,
            median_score: 0.0,
        };
        assert!(!c.is_real(&summary));
        assert!(c.is_real(&BurstSummary {
            avg_score: 0.24,
            ..summary
        }));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[0.3, 0.1, 0.2]), 0.2);
        assert_eq!(median(&[0.4, 0.1, 0.2, 0.3]), 0.25);
    }

    #[test]
    fn test_blend_reference_is_sequential_half_blend() {
        let blended = blend_reference(&[tagged(0), tagged(100), tagged(200)]).unwrap();
        // ((0 + 100) / 2 + 200) / 2
        assert_eq!(blended.get_pixel(0, 0)[0], 125);
        assert!(blend_reference(&[]).is_none());
    }

    #[test]
    fn test_camera_unavailable_fails_open() {
        let verifier = BurstVerifier::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let mut camera = ScriptedCamera::unavailable();

        let result = verifier.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::Real);
        assert!(!result.is_camera_verified());
        assert!(matches!(result.details, VerificationDetails::Skipped { .. }));
        assert!(result.describe().contains("Camera unavailable"));
        assert_eq!(camera.close_calls, 1);
    }

    #[test]
    fn test_camera_unavailable_fails_closed_when_configured() {
        let config = VerificationConfig {
            fail_policy: FailPolicy::Closed,
            ..fast_config()
        };
        let verifier = BurstVerifier::new(&DetectorConfig::default(), &config).unwrap();
        let result = verifier.verify(&mut ScriptedCamera::unavailable());
        assert_eq!(result.verdict, Verdict::NotReal);
    }

    #[test]
    fn test_too_few_reference_frames_fails_open() {
        let verifier = BurstVerifier::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let mut camera = ScriptedCamera::new(vec![scene(60)]);

        let result = verifier.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::Real);
        assert!(result.describe().contains("Insufficient reference frames"));
        assert_eq!(camera.close_calls, 1);
    }

    #[test]
    fn test_static_scene_burst_is_not_real() {
        let verifier = BurstVerifier::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let mut camera = ScriptedCamera::new(vec![scene(60); 20]);

        let result = verifier.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::NotReal);
        assert!(result.best_frame.is_none());
        assert_eq!(camera.close_calls, 1);
    }

    #[test]
    fn test_moving_object_burst_is_real() {
        let verifier = BurstVerifier::new(&DetectorConfig::default(), &fast_config()).unwrap();
        let mut frames = vec![scene(60); 5];
        for i in 0..15u32 {
            frames.push(scene_with_object(40 + i * 25));
        }
        let mut camera = ScriptedCamera::new(frames);

        let result = verifier.verify(&mut camera);
        assert_eq!(result.verdict, Verdict::Real);
        assert!(result.is_camera_verified());
        assert!(result.best_frame.is_some());
        match &result.details {
            VerificationDetails::Burst(summary) => {
                assert_eq!(summary.reference_frames, 5);
                assert_eq!(summary.frames_analyzed, 15);
                assert!(summary.frames_above_threshold >= 3);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }
}
