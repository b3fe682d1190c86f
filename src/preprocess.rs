//! Frame preprocessing
//!
//! Converts captured color frames into smoothed single-channel intensity maps
//! at the canonical resolution. A large Gaussian kernel removes pixel-level
//! sensor noise before any differencing happens.

use crate::config::DetectorConfig;
use crate::error::VerifyError;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;

/// Gaussian sigma for an odd square kernel of the given size
pub fn kernel_sigma(kernel_size: u32) -> f32 {
    let k = kernel_size.max(1) as f32;
    0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8
}

/// Grayscale/blur preprocessor
#[derive(Debug, Clone)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    sigma: f32,
}

impl Preprocessor {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            width: config.frame_width,
            height: config.frame_height,
            sigma: kernel_sigma(config.blur_kernel),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resize a color frame to the canonical resolution
    pub fn normalize_color(&self, frame: &RgbImage) -> Result<RgbImage, VerifyError> {
        check_frame(frame)?;
        if frame.dimensions() == (self.width, self.height) {
            return Ok(frame.clone());
        }
        Ok(imageops::resize(
            frame,
            self.width,
            self.height,
            FilterType::Triangle,
        ))
    }

    /// Luma conversion at canonical resolution, without smoothing
    pub fn to_gray(&self, frame: &RgbImage) -> Result<GrayImage, VerifyError> {
        check_frame(frame)?;
        let gray = imageops::grayscale(frame);
        if gray.dimensions() == (self.width, self.height) {
            return Ok(gray);
        }
        Ok(imageops::resize(
            &gray,
            self.width,
            self.height,
            FilterType::Triangle,
        ))
    }

    /// Full preprocessing: luma, resize, blur
    pub fn preprocess(&self, frame: &RgbImage) -> Result<GrayImage, VerifyError> {
        let gray = self.to_gray(frame)?;
        Ok(gaussian_blur_f32(&gray, self.sigma))
    }
}

fn check_frame(frame: &RgbImage) -> Result<(), VerifyError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(VerifyError::InvalidFrame(format!(
            "empty frame ({width}x{height})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            frame_width: 64,
            frame_height: 48,
            blur_kernel: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_kernel_sigma_matches_kernel_size() {
        assert!((kernel_sigma(21) - 3.5).abs() < 1e-6);
        assert!((kernel_sigma(3) - 0.8).abs() < 1e-6);
        assert!(kernel_sigma(1) > 0.0);
    }

    #[test]
    fn test_preprocess_resizes_to_canonical() {
        let pre = Preprocessor::new(&small_config());
        let frame = RgbImage::from_pixel(128, 96, Rgb([120, 120, 120]));

        let gray = pre.preprocess(&frame).unwrap();
        assert_eq!(gray.dimensions(), (64, 48));
    }

    #[test]
    fn test_blur_smooths_isolated_noise() {
        let pre = Preprocessor::new(&small_config());
        let mut frame = RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]));
        frame.put_pixel(32, 24, Rgb([255, 255, 255]));

        let sharp = pre.to_gray(&frame).unwrap();
        let blurred = pre.preprocess(&frame).unwrap();

        assert_eq!(sharp.get_pixel(32, 24)[0], 255);
        assert!(blurred.get_pixel(32, 24)[0] < 100);
        assert!(blurred.get_pixel(33, 24)[0] > 0);
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let pre = Preprocessor::new(&small_config());
        let frame = RgbImage::new(0, 0);
        assert!(matches!(
            pre.preprocess(&frame),
            Err(VerifyError::InvalidFrame(_))
        ));
    }
}
