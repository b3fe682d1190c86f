//! Continuous monitoring mode
//!
//! A long-lived detector that scores every frame against its own background
//! model and recent-frame buffer, and turns the per-frame judgments into a
//! motion streak. A confirmed event fires once the streak reaches the
//! configured length and stays raised until the caller acknowledges it.

use crate::background::BackgroundModel;
use crate::buffer::FrameBuffer;
use crate::config::DetectorConfig;
use crate::error::VerifyError;
use crate::preprocess::Preprocessor;
use crate::scorer::{FrameScore, FrameScorer};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counter of recent positive frame judgments, floored at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionStreak {
    count: u32,
    threshold: u32,
}

impl MotionStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Apply one frame judgment and return the new count
    pub fn record(&mut self, is_motion: bool) -> u32 {
        if is_motion {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = self.count.saturating_sub(1);
        }
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_confirmed(&self) -> bool {
        self.count >= self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Result of feeding one frame to the continuous detector
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    /// `None` for the frame that initialized the background
    pub score: Option<FrameScore>,
    pub streak: u32,
    pub confirmed: bool,
}

impl FrameAnalysis {
    pub fn confidence(&self) -> f64 {
        self.score.as_ref().map_or(0.0, |s| s.confidence)
    }
}

/// Streak-based detector owning its background model and frame buffer
#[derive(Debug, Clone)]
pub struct ContinuousDetector {
    preprocessor: Preprocessor,
    scorer: FrameScorer,
    background: BackgroundModel,
    buffer: FrameBuffer,
    streak: MotionStreak,
    retain: f64,
    learn: f64,
    frames_seen: u64,
}

impl ContinuousDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            preprocessor: Preprocessor::new(config),
            scorer: FrameScorer::new(config),
            background: BackgroundModel::new(),
            buffer: FrameBuffer::new(config.frame_buffer_size),
            streak: MotionStreak::new(config.min_motion_frames),
            retain: config.background_retain,
            learn: config.background_learn,
            frames_seen: 0,
        }
    }

    /// Preprocess and analyse a captured color frame
    pub fn process(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, VerifyError> {
        let gray = self.preprocessor.preprocess(frame)?;
        self.process_gray(gray)
    }

    /// Analyse an already preprocessed frame
    pub fn process_gray(&mut self, gray: GrayImage) -> Result<FrameAnalysis, VerifyError> {
        self.frames_seen += 1;

        if !self.background.is_ready() {
            self.background.initialize(&gray);
            self.buffer.push(gray);
            debug!("background model initialized");
            return Ok(FrameAnalysis {
                score: None,
                streak: self.streak.count(),
                confirmed: self.streak.is_confirmed(),
            });
        }

        // Score against the pre-update background so this frame's motion is
        // judged before it is absorbed
        let score = self
            .scorer
            .score(&gray, self.buffer.latest(), &self.background)?;
        self.background.update(&gray, self.retain, self.learn)?;
        self.buffer.push(gray);

        let streak = self.streak.record(score.is_motion);
        debug!(
            confidence = score.confidence,
            contours = score.measurements.contour_count,
            streak,
            "frame scored"
        );

        Ok(FrameAnalysis {
            confirmed: self.streak.is_confirmed(),
            streak,
            score: Some(score),
        })
    }

    /// Consume a confirmed event; returns whether one was pending
    pub fn acknowledge(&mut self) -> bool {
        let confirmed = self.streak.is_confirmed();
        if confirmed {
            self.streak.reset();
        }
        confirmed
    }

    /// Forget the background, buffer and streak
    pub fn reinitialize(&mut self) {
        self.background.reset();
        self.buffer.clear();
        self.streak.reset();
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn streak(&self) -> &MotionStreak {
        &self.streak
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn uniform(value: u8) -> GrayImage {
        GrayImage::from_pixel(640, 480, Luma([value]))
    }

    fn with_rect(x0: u32) -> GrayImage {
        let mut img = uniform(50);
        for y in 100..200 {
            for x in x0..x0 + 100 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        img
    }

    #[test]
    fn test_streak_never_negative() {
        let mut streak = MotionStreak::new(3);
        assert_eq!(streak.record(false), 0);
        assert_eq!(streak.record(false), 0);
        assert_eq!(streak.record(true), 1);
        assert_eq!(streak.record(true), 2);
        assert_eq!(streak.record(false), 1);
        assert_eq!(streak.record(true), 2);
        assert!(!streak.is_confirmed());
        assert_eq!(streak.record(true), 3);
        assert!(streak.is_confirmed());
    }

    #[test]
    fn test_streak_steps_by_one() {
        let mut streak = MotionStreak::new(3);
        let pattern = [true, false, true, true, false, false, false, true, true, true, true];
        let mut previous = 0u32;
        for judgment in pattern {
            let next = streak.record(judgment);
            if judgment {
                assert_eq!(next, previous + 1);
            } else {
                assert_eq!(next, previous.saturating_sub(1));
            }
            previous = next;
        }
    }

    #[test]
    fn test_first_frame_initializes_background() {
        let mut detector = ContinuousDetector::new(&DetectorConfig::default());
        let analysis = detector.process_gray(uniform(50)).unwrap();

        assert!(analysis.score.is_none());
        assert!(detector.background().is_ready());
        assert_eq!(detector.buffer().len(), 1);
    }

    #[test]
    fn test_static_scene_never_confirms() {
        let mut detector = ContinuousDetector::new(&DetectorConfig::default());
        for _ in 0..10 {
            let analysis = detector.process_gray(uniform(50)).unwrap();
            assert!(!analysis.confirmed);
            assert_eq!(analysis.confidence(), 0.0);
        }
        assert_eq!(detector.streak().count(), 0);
    }

    #[test]
    fn test_moving_object_confirms_after_streak() {
        let mut detector = ContinuousDetector::new(&DetectorConfig::default());
        detector.process_gray(uniform(50)).unwrap();

        let mut confirmed_at = None;
        for (i, x0) in [100u32, 160, 220, 280, 340].into_iter().enumerate() {
            let analysis = detector.process_gray(with_rect(x0)).unwrap();
            if analysis.confirmed && confirmed_at.is_none() {
                confirmed_at = Some(i);
            }
        }

        assert_eq!(confirmed_at, Some(2));
        assert!(detector.acknowledge());
        assert_eq!(detector.streak().count(), 0);
        assert!(!detector.acknowledge());
    }

    #[test]
    fn test_buffer_bounded_by_capacity() {
        let config = DetectorConfig::default();
        let mut detector = ContinuousDetector::new(&config);
        for _ in 0..12 {
            detector.process_gray(uniform(80)).unwrap();
        }
        assert_eq!(detector.buffer().len(), config.frame_buffer_size);
        assert_eq!(detector.frames_seen(), 12);
    }

    #[test]
    fn test_reinitialize_clears_state() {
        let mut detector = ContinuousDetector::new(&DetectorConfig::default());
        detector.process_gray(uniform(50)).unwrap();
        detector.reinitialize();
        assert!(!detector.background().is_ready());
        assert!(detector.buffer().is_empty());
    }
}
