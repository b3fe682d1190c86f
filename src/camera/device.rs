//! Native webcam capture through nokhwa

use super::Camera;
use crate::error::VerifyError;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use tracing::warn;

/// Webcam identified by its system index
pub struct DeviceCamera {
    index: u32,
    camera: Option<nokhwa::Camera>,
}

impl DeviceCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            camera: None,
        }
    }
}

impl Camera for DeviceCamera {
    fn open(&mut self) -> Result<(), VerifyError> {
        if self.camera.is_some() {
            return Ok(());
        }
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = nokhwa::Camera::new(CameraIndex::Index(self.index), format)
            .map_err(|e| VerifyError::CameraUnavailable(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| VerifyError::CameraUnavailable(e.to_string()))?;
        self.camera = Some(camera);
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, VerifyError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| VerifyError::CaptureError("camera not open".to_string()))?;
        let buffer = camera
            .frame()
            .map_err(|e| VerifyError::CaptureError(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| VerifyError::CaptureError(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| VerifyError::InvalidFrame("decoded buffer size mismatch".to_string()))
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                warn!("Failed to stop camera stream: {}", e);
            }
        }
    }

    fn describe(&self) -> String {
        format!("webcam #{}", self.index)
    }
}
