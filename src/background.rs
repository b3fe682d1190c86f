//! Background model
//!
//! A slowly adapting estimate of the empty scene. The model keeps float
//! intensities so that repeated exponential smoothing converges without the
//! rounding stalls an 8-bit accumulator would show.

use crate::error::VerifyError;
use image::{GrayImage, Luma};

/// Running reference intensity map
#[derive(Debug, Clone, Default)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    /// Row-major intensities; empty until initialized
    data: Vec<f32>,
    /// Number of updates applied since initialization
    updates: u64,
}

impl BackgroundModel {
    /// Create an empty (not ready) model
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a model initialized from a frame
    pub fn from_frame(frame: &GrayImage) -> Self {
        let mut model = Self::new();
        model.initialize(frame);
        model
    }

    /// Set the model to the given frame and mark it ready
    pub fn initialize(&mut self, frame: &GrayImage) {
        let (width, height) = frame.dimensions();
        self.width = width;
        self.height = height;
        self.data = frame.as_raw().iter().map(|&p| p as f32).collect();
        self.updates = 0;
    }

    /// Drop the current estimate; the next frame re-initializes it
    pub fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.data.clear();
        self.updates = 0;
    }

    pub fn is_ready(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.is_ready().then_some((self.width, self.height))
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// Model intensity at a pixel
    pub fn value_at(&self, x: u32, y: u32) -> Option<f32> {
        if !self.is_ready() || x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Blend a frame into the model: `model = retain * model + learn * frame`
    pub fn update(
        &mut self,
        frame: &GrayImage,
        retain: f64,
        learn: f64,
    ) -> Result<(), VerifyError> {
        self.check_frame(frame)?;
        let retain = retain as f32;
        let learn = learn as f32;
        for (bg, &px) in self.data.iter_mut().zip(frame.as_raw().iter()) {
            *bg = retain * *bg + learn * px as f32;
        }
        self.updates += 1;
        Ok(())
    }

    /// Absolute per-pixel difference between a frame and the model
    pub fn abs_diff(&self, frame: &GrayImage) -> Result<GrayImage, VerifyError> {
        self.check_frame(frame)?;
        let diff: Vec<u8> = self
            .data
            .iter()
            .zip(frame.as_raw().iter())
            .map(|(&bg, &px)| (px as f32 - bg).abs().round().min(255.0) as u8)
            .collect();
        GrayImage::from_raw(self.width, self.height, diff).ok_or_else(|| {
            VerifyError::ImageError("difference buffer size mismatch".to_string())
        })
    }

    /// Current estimate rounded to 8-bit
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.data[y as usize * self.width as usize + x as usize];
            Luma([v.round().clamp(0.0, 255.0) as u8])
        })
    }

    fn check_frame(&self, frame: &GrayImage) -> Result<(), VerifyError> {
        if !self.is_ready() {
            return Err(VerifyError::InvalidFrame(
                "background model is not initialized".to_string(),
            ));
        }
        if frame.dimensions() != (self.width, self.height) {
            let (w, h) = frame.dimensions();
            return Err(VerifyError::InvalidFrame(format!(
                "frame is {w}x{h}, background is {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_initialization() {
        let mut model = BackgroundModel::new();
        assert!(!model.is_ready());
        assert_eq!(model.dimensions(), None);

        let frame = GrayImage::from_pixel(8, 6, Luma([40]));
        assert!(model.update(&frame, 0.95, 0.05).is_err());

        model.initialize(&frame);
        assert!(model.is_ready());
        assert_eq!(model.dimensions(), Some((8, 6)));
        assert_eq!(model.value_at(3, 3), Some(40.0));
    }

    #[test]
    fn test_update_blends_with_weights() {
        let mut model = BackgroundModel::from_frame(&GrayImage::from_pixel(4, 4, Luma([100])));
        model
            .update(&GrayImage::from_pixel(4, 4, Luma([200])), 0.95, 0.05)
            .unwrap();

        let v = model.value_at(0, 0).unwrap();
        assert!((v - 105.0).abs() < 1e-3);
        assert_eq!(model.update_count(), 1);
    }

    #[test]
    fn test_repeated_updates_converge_without_overshoot() {
        let mut model = BackgroundModel::from_frame(&GrayImage::from_pixel(4, 4, Luma([20])));
        let target = GrayImage::from_pixel(4, 4, Luma([180]));

        let mut previous_gap = f32::MAX;
        for _ in 0..400 {
            model.update(&target, 0.92, 0.08).unwrap();
            let v = model.value_at(1, 2).unwrap();
            assert!(v <= 180.0 + 1e-3, "overshoot: {v}");
            let gap = 180.0 - v;
            assert!(gap <= previous_gap + 1e-4, "oscillation: {gap} after {previous_gap}");
            previous_gap = gap;
        }

        assert!(previous_gap < 0.01);
        assert_eq!(model.to_image().get_pixel(1, 2)[0], 180);
    }

    #[test]
    fn test_update_with_same_frame_is_stable() {
        let frame = GrayImage::from_pixel(4, 4, Luma([77]));
        let mut model = BackgroundModel::from_frame(&frame);
        for _ in 0..50 {
            model.update(&frame, 0.95, 0.05).unwrap();
        }
        assert!((model.value_at(2, 2).unwrap() - 77.0).abs() < 1e-3);
    }

    #[test]
    fn test_abs_diff() {
        let model = BackgroundModel::from_frame(&GrayImage::from_pixel(3, 3, Luma([100])));
        let mut frame = GrayImage::from_pixel(3, 3, Luma([100]));
        frame.put_pixel(1, 1, Luma([30]));

        let diff = model.abs_diff(&frame).unwrap();
        assert_eq!(diff.get_pixel(1, 1)[0], 70);
        assert_eq!(diff.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let model = BackgroundModel::from_frame(&GrayImage::new(4, 4));
        assert!(model.abs_diff(&GrayImage::new(5, 4)).is_err());
    }
}
