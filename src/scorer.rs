//! Frame-difference scoring
//!
//! Turns one preprocessed frame into a confidence value. The frame is
//! differenced against the previous buffered frame and against the background
//! model; both differences are thresholded and dilated into foreground masks,
//! and external contours of the background mask are measured.
//!
//! A frame is judged "motion" only when three gates pass: the weighted
//! confidence, at least one surviving contour, and a total area above the
//! minimum contour area. Any single factor can saturate on its own.

use crate::background::BackgroundModel;
use crate::config::DetectorConfig;
use crate::error::VerifyError;
use crate::types::{BurstFactors, DiffMeasurements, ScoreFactors};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// One connected moving region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionContour {
    /// Enclosed area of the contour border (px²)
    pub area: f64,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Continuous-mode score for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameScore {
    pub measurements: DiffMeasurements,
    pub factors: ScoreFactors,
    pub confidence: f64,
    pub is_motion: bool,
    pub contours: Vec<MotionContour>,
}

/// Burst-mode score for one analysis frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstFrameScore {
    pub measurements: DiffMeasurements,
    pub factors: BurstFactors,
    pub score: f64,
}

/// Thresholded mask plus the contours that survived the area filter
#[derive(Debug, Clone)]
pub struct MaskAnalysis {
    pub mask: GrayImage,
    pub contours: Vec<MotionContour>,
}

impl MaskAnalysis {
    pub fn total_area(&self) -> f64 {
        self.contours.iter().map(|c| c.area).sum()
    }
}

/// Absolute per-pixel difference of two equally sized frames
pub fn frame_diff(a: &GrayImage, b: &GrayImage) -> Result<GrayImage, VerifyError> {
    if a.dimensions() != b.dimensions() {
        return Err(VerifyError::InvalidFrame(format!(
            "cannot difference {:?} against {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    let diff: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&p, &q)| p.abs_diff(q))
        .collect();
    GrayImage::from_raw(a.width(), a.height(), diff)
        .ok_or_else(|| VerifyError::ImageError("difference buffer size mismatch".to_string()))
}

/// Binary mask: 255 where the difference exceeds the cutoff
pub fn foreground_mask(diff: &GrayImage, cutoff: u8) -> GrayImage {
    GrayImage::from_fn(diff.width(), diff.height(), |x, y| {
        if diff.get_pixel(x, y)[0] > cutoff {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Square-element dilation applied `iterations` times
pub fn dilate_mask(mask: &GrayImage, radius: u8, iterations: u32) -> GrayImage {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = dilate(&out, Norm::LInf, radius);
    }
    out
}

/// Mean intensity of a difference map
pub fn mean_intensity(diff: &GrayImage) -> f64 {
    let pixels = diff.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    sum as f64 / pixels.len() as f64
}

/// Enclosed polygon area of a closed point sequence (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

/// Outermost contours of a binary mask with area inside `[min_area, max_area]`
pub fn external_contours(mask: &GrayImage, min_area: f64, max_area: f64) -> Vec<MotionContour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| {
            let area = polygon_area(&c.points);
            if area < min_area || area > max_area {
                return None;
            }
            let min_x = c.points.iter().map(|p| p.x).min()?;
            let max_x = c.points.iter().map(|p| p.x).max()?;
            let min_y = c.points.iter().map(|p| p.y).min()?;
            let max_y = c.points.iter().map(|p| p.y).max()?;
            Some(MotionContour {
                area,
                x: min_x.max(0) as u32,
                y: min_y.max(0) as u32,
                width: (max_x - min_x + 1).max(0) as u32,
                height: (max_y - min_y + 1).max(0) as u32,
            })
        })
        .collect()
}

/// Per-frame scorer shared by continuous and burst modes
#[derive(Debug, Clone)]
pub struct FrameScorer {
    cutoff: u8,
    dilate_radius: u8,
    dilate_iterations: u32,
    min_area: f64,
    max_area: f64,
    confidence_threshold: f64,
}

impl FrameScorer {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            cutoff: config.motion_threshold,
            dilate_radius: config.dilate_radius,
            dilate_iterations: config.dilate_iterations,
            min_area: config.min_contour_area,
            max_area: config.max_contour_area,
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Threshold, dilate and extract contours from one difference map
    pub fn analyze_diff(&self, diff: &GrayImage) -> MaskAnalysis {
        let mask = dilate_mask(
            &foreground_mask(diff, self.cutoff),
            self.dilate_radius,
            self.dilate_iterations,
        );
        let contours = external_contours(&mask, self.min_area, self.max_area);
        MaskAnalysis { mask, contours }
    }

    /// The three-gate motion judgment
    pub fn is_motion(&self, confidence: f64, contour_count: usize, total_area: f64) -> bool {
        confidence >= self.confidence_threshold
            && contour_count > 0
            && total_area > self.min_area
    }

    /// Score a frame against the previous buffered frame and the background.
    ///
    /// The background must not yet include `frame`.
    pub fn score(
        &self,
        frame: &GrayImage,
        previous: Option<&GrayImage>,
        background: &BackgroundModel,
    ) -> Result<FrameScore, VerifyError> {
        let bg_diff = background.abs_diff(frame)?;
        let bg = self.analyze_diff(&bg_diff);

        let frame_contour_count = match previous {
            Some(prev) => self.analyze_diff(&frame_diff(frame, prev)?).contours.len(),
            None => 0,
        };

        let measurements = DiffMeasurements {
            contour_count: bg.contours.len(),
            frame_contour_count,
            total_area: bg.total_area(),
            mean_delta: mean_intensity(&bg_diff),
        };
        let factors = measurements.continuous_factors();
        let confidence = factors.confidence();
        let is_motion = self.is_motion(
            confidence,
            measurements.contour_count,
            measurements.total_area,
        );

        Ok(FrameScore {
            measurements,
            factors,
            confidence,
            is_motion,
            contours: bg.contours,
        })
    }

    /// Score an analysis frame against a burst's adaptive reference
    pub fn score_burst(
        &self,
        frame: &GrayImage,
        reference: &BackgroundModel,
    ) -> Result<BurstFrameScore, VerifyError> {
        let diff = reference.abs_diff(frame)?;
        let analysis = self.analyze_diff(&diff);

        let measurements = DiffMeasurements {
            contour_count: analysis.contours.len(),
            frame_contour_count: 0,
            total_area: analysis.total_area(),
            mean_delta: mean_intensity(&diff),
        };
        let factors = measurements.burst_factors();

        Ok(BurstFrameScore {
            measurements,
            factors,
            score: factors.score(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: u8) -> GrayImage {
        GrayImage::from_pixel(640, 480, Luma([value]))
    }

    fn with_rect(base: u8, value: u8, x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
        let mut img = uniform(base);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([value]));
            }
        }
        img
    }

    fn scorer() -> FrameScorer {
        FrameScorer::new(&DetectorConfig::default())
    }

    #[test]
    fn test_polygon_area_of_square() {
        let square = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let background = BackgroundModel::from_frame(&uniform(90));
        let frame = uniform(90);

        let score = scorer()
            .score(&frame, Some(&uniform(90)), &background)
            .unwrap();

        assert_eq!(score.confidence, 0.0);
        assert!(!score.is_motion);
        assert!(score.contours.is_empty());
        assert_eq!(score.measurements, DiffMeasurements::default());
    }

    #[test]
    fn test_single_rectangle_is_motion() {
        let background = BackgroundModel::from_frame(&uniform(50));
        let previous = uniform(50);
        let frame = with_rect(50, 200, 100, 100, 100, 100);

        let score = scorer().score(&frame, Some(&previous), &background).unwrap();

        assert_eq!(score.measurements.contour_count, 1);
        assert_eq!(score.measurements.frame_contour_count, 1);
        // Two 5x5 dilations grow each side by 4 px: 108x108 pixels, border polygon 107x107
        assert_eq!(score.measurements.total_area, 107.0 * 107.0);
        assert!((score.factors.contour_count - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(score.factors.motion_area, 1.0);
        assert_eq!(score.factors.consistency, 1.0);

        let expected_mean = 10_000.0 * 150.0 / (640.0 * 480.0);
        assert!((score.measurements.mean_delta - expected_mean).abs() < 1e-9);
        assert!(score.confidence >= 0.6);
        assert!(score.is_motion);
    }

    #[test]
    fn test_small_noise_is_filtered_by_area() {
        let background = BackgroundModel::from_frame(&uniform(50));
        let frame = with_rect(50, 255, 300, 200, 3, 3);

        let score = scorer().score(&frame, None, &background).unwrap();
        assert_eq!(score.measurements.contour_count, 0);
        assert!(!score.is_motion);
    }

    #[test]
    fn test_whole_frame_shift_is_rejected_by_upper_bound() {
        let background = BackgroundModel::from_frame(&uniform(40));
        let frame = uniform(160);

        let score = scorer().score(&frame, None, &background).unwrap();

        // Whole-frame contour exceeds the maximum area
        assert_eq!(score.measurements.contour_count, 0);
        assert_eq!(score.factors.mean_delta, 1.0);
        assert!(!score.is_motion);
    }

    #[test]
    fn test_no_previous_frame_means_no_consistency() {
        let background = BackgroundModel::from_frame(&uniform(50));
        let frame = with_rect(50, 200, 100, 100, 100, 100);

        let score = scorer().score(&frame, None, &background).unwrap();
        assert_eq!(score.factors.consistency, 0.0);
        assert!(score.confidence < 0.6);
        assert!(!score.is_motion);
    }

    #[test]
    fn test_motion_gates_are_independent() {
        let s = scorer();
        assert!(s.is_motion(0.7, 1, 600.0));
        assert!(!s.is_motion(0.59, 1, 600.0));
        assert!(!s.is_motion(0.9, 0, 600.0));
        assert!(!s.is_motion(0.9, 1, 500.0));
    }

    #[test]
    fn test_burst_score_weights() {
        let reference = BackgroundModel::from_frame(&uniform(50));
        let frame = with_rect(50, 200, 100, 100, 100, 100);

        let score = scorer().score_burst(&frame, &reference).unwrap();
        let expected_mean = 10_000.0 * 150.0 / (640.0 * 480.0);
        let expected = 0.4 * 1.0 + 0.3 * (expected_mean / 20.0) + 0.3 * (1.0 / 3.0);
        assert!((score.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_frame_diff_rejects_mismatched_sizes() {
        assert!(frame_diff(&GrayImage::new(4, 4), &GrayImage::new(4, 5)).is_err());
    }
}
