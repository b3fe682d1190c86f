//! Core types for the verification engine
//!
//! This module defines the values that flow between stages: per-frame score
//! factors, verification verdicts and the summary of a verification attempt.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contour count at which the count sub-score saturates
pub const CONTOUR_COUNT_SATURATION: f64 = 3.0;

/// Total motion area (px²) at which the area sub-score saturates
pub const AREA_SATURATION_PX: f64 = 10_000.0;

/// Mean background difference (0-255 scale) at which the delta sub-score saturates
pub const MEAN_DELTA_SATURATION: f64 = 20.0;

/// Continuous-mode weights: contour count, area, consistency, mean delta
pub const CONTINUOUS_WEIGHTS: [f64; 4] = [0.30, 0.25, 0.25, 0.20];

/// Burst-mode weights: area, mean delta, contour count
pub const BURST_WEIGHTS: [f64; 3] = [0.4, 0.3, 0.3];

/// Clamp a raw ratio to [0, 1], mapping NaN to 0 and +inf to 1
pub fn unit_clamp(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Raw measurements taken from one frame's difference masks
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffMeasurements {
    /// Surviving contours in the background-difference mask
    pub contour_count: usize,
    /// Surviving contours in the frame-to-frame mask
    pub frame_contour_count: usize,
    /// Summed area of surviving background contours (px²)
    pub total_area: f64,
    /// Mean intensity of the background-difference map
    pub mean_delta: f64,
}

impl DiffMeasurements {
    /// Sub-score for the number of moving regions
    pub fn contour_score(&self) -> f64 {
        unit_clamp(self.contour_count as f64 / CONTOUR_COUNT_SATURATION)
    }

    /// Sub-score for the summed moving area
    pub fn area_score(&self) -> f64 {
        unit_clamp(self.total_area / AREA_SATURATION_PX)
    }

    /// Ratio of frame-to-frame regions to background regions
    pub fn consistency_score(&self) -> f64 {
        if self.contour_count == 0 {
            return 0.0;
        }
        unit_clamp(self.frame_contour_count as f64 / self.contour_count as f64)
    }

    /// Sub-score for the average intensity change
    pub fn mean_delta_score(&self) -> f64 {
        unit_clamp(self.mean_delta / MEAN_DELTA_SATURATION)
    }

    pub fn continuous_factors(&self) -> ScoreFactors {
        ScoreFactors::new(
            self.contour_score(),
            self.area_score(),
            self.consistency_score(),
            self.mean_delta_score(),
        )
    }

    pub fn burst_factors(&self) -> BurstFactors {
        BurstFactors::new(
            self.area_score(),
            self.mean_delta_score(),
            self.contour_score(),
        )
    }
}

/// The four continuous-mode sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub contour_count: f64,
    pub motion_area: f64,
    pub consistency: f64,
    pub mean_delta: f64,
}

impl ScoreFactors {
    pub fn new(contour_count: f64, motion_area: f64, consistency: f64, mean_delta: f64) -> Self {
        Self {
            contour_count: unit_clamp(contour_count),
            motion_area: unit_clamp(motion_area),
            consistency: unit_clamp(consistency),
            mean_delta: unit_clamp(mean_delta),
        }
    }

    /// Weighted confidence in [0, 1]
    pub fn confidence(&self) -> f64 {
        let [w_count, w_area, w_consistency, w_delta] = CONTINUOUS_WEIGHTS;
        unit_clamp(
            w_count * self.contour_count
                + w_area * self.motion_area
                + w_consistency * self.consistency
                + w_delta * self.mean_delta,
        )
    }
}

/// The three burst-mode sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstFactors {
    pub motion_area: f64,
    pub mean_delta: f64,
    pub contour_count: f64,
}

impl BurstFactors {
    pub fn new(motion_area: f64, mean_delta: f64, contour_count: f64) -> Self {
        Self {
            motion_area: unit_clamp(motion_area),
            mean_delta: unit_clamp(mean_delta),
            contour_count: unit_clamp(contour_count),
        }
    }

    pub fn score(&self) -> f64 {
        let [w_area, w_delta, w_count] = BURST_WEIGHTS;
        unit_clamp(
            w_area * self.motion_area + w_delta * self.mean_delta + w_count * self.contour_count,
        )
    }
}

/// Outcome of a confirmation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Real motion; report it
    Real,
    /// False positive; drop it
    NotReal,
    /// Not enough evidence yet; ask again on the next reading
    Pending,
}

impl Verdict {
    pub fn is_real(&self) -> bool {
        matches!(self, Verdict::Real)
    }
}

/// Aggregate statistics of one burst verification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstSummary {
    pub reference_frames: usize,
    pub frames_analyzed: usize,
    pub frames_above_threshold: usize,
    pub max_score: f64,
    pub avg_score: f64,
    pub median_score: f64,
}

/// Mode-specific diagnostics attached to a verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VerificationDetails {
    Burst(BurstSummary),
    Streak {
        frames_analyzed: usize,
        peak_streak: u32,
        max_confidence: f64,
    },
    Debounce {
        consecutive_readings: u32,
        required: u32,
    },
    /// Verification could not run; carries a human-readable diagnostic
    Skipped { reason: String },
}

/// Result of one verification attempt
#[derive(Debug, Clone)]
pub struct Verification {
    pub verdict: Verdict,
    /// Headline confidence in [0, 1]
    pub confidence: f64,
    /// Wall time spent verifying
    pub duration: Duration,
    pub details: VerificationDetails,
    /// Highest-scoring captured frame, if any frame scored above zero
    pub best_frame: Option<RgbImage>,
}

impl Verification {
    /// True when the verdict came from camera evidence rather than a fallback
    pub fn is_camera_verified(&self) -> bool {
        self.verdict.is_real()
            && matches!(
                self.details,
                VerificationDetails::Burst(_) | VerificationDetails::Streak { .. }
            )
    }

    /// Diagnostic text for logs
    pub fn describe(&self) -> String {
        match &self.details {
            VerificationDetails::Burst(s) => format!(
                "burst: {}/{} frames above threshold, max {:.3}, avg {:.3}, median {:.3}",
                s.frames_above_threshold,
                s.frames_analyzed,
                s.max_score,
                s.avg_score,
                s.median_score
            ),
            VerificationDetails::Streak {
                frames_analyzed,
                peak_streak,
                max_confidence,
            } => format!(
                "streak: peak {peak_streak} over {frames_analyzed} frames, max confidence {max_confidence:.3}"
            ),
            VerificationDetails::Debounce {
                consecutive_readings,
                required,
            } => format!("debounce: {consecutive_readings}/{required} consecutive readings"),
            VerificationDetails::Skipped { reason } => reason.clone(),
        }
    }
}
