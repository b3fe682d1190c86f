//! Camera collaborator
//!
//! The engine only needs `open`, `read` and `close`. A [`CameraSession`]
//! holds the device for the duration of one capture run and closes it when
//! dropped, so every exit path releases the handle. [`CaptureSchedule`] is the
//! single place where captures are paced.

mod sequence;

#[cfg(feature = "device")]
mod device;

pub use sequence::ImageSequenceCamera;

#[cfg(feature = "device")]
pub use device::DeviceCamera;

use crate::error::VerifyError;
use image::RgbImage;
use std::time::Duration;
use tracing::{debug, warn};

/// Frame source contract
pub trait Camera {
    /// Acquire the device
    fn open(&mut self) -> Result<(), VerifyError>;

    /// Capture one color frame from an opened device
    fn read(&mut self) -> Result<RgbImage, VerifyError>;

    /// Release the device; must be safe to call when not open
    fn close(&mut self);

    /// Human-readable device description for logs
    fn describe(&self) -> String {
        "camera".to_string()
    }
}

/// Exclusive use of a camera, closed on drop
pub struct CameraSession<'a> {
    camera: &'a mut dyn Camera,
    frames_read: usize,
    failures: usize,
}

impl<'a> CameraSession<'a> {
    /// Open the camera; on failure the device is closed before returning
    pub fn open(camera: &'a mut dyn Camera) -> Result<Self, VerifyError> {
        if let Err(e) = camera.open() {
            camera.close();
            return Err(e);
        }
        debug!(camera = %camera.describe(), "camera opened");
        Ok(Self {
            camera,
            frames_read: 0,
            failures: 0,
        })
    }

    pub fn read(&mut self) -> Result<RgbImage, VerifyError> {
        match self.camera.read() {
            Ok(frame) => {
                self.frames_read += 1;
                Ok(frame)
            }
            Err(e) => {
                self.failures += 1;
                Err(e)
            }
        }
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    pub fn failures(&self) -> usize {
        self.failures
    }
}

impl Drop for CameraSession<'_> {
    fn drop(&mut self) {
        self.camera.close();
        debug!(
            frames = self.frames_read,
            failures = self.failures,
            "camera released"
        );
    }
}

/// A fixed number of captures separated by a fixed interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSchedule {
    pub frames: usize,
    pub interval: Duration,
}

impl CaptureSchedule {
    pub fn new(frames: usize, interval: Duration) -> Self {
        Self { frames, interval }
    }

    /// Capture up to `frames` frames, handing each successful one to
    /// `on_frame` with its slot index. Failed reads are skipped. The
    /// interval is slept between slots, not after the last one.
    ///
    /// Returns the number of frames delivered.
    pub fn run<F>(&self, session: &mut CameraSession<'_>, mut on_frame: F) -> usize
    where
        F: FnMut(usize, RgbImage),
    {
        let mut delivered = 0;
        for slot in 0..self.frames {
            if slot > 0 && !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
            match session.read() {
                Ok(frame) => {
                    on_frame(slot, frame);
                    delivered += 1;
                }
                Err(e) => warn!(slot, error = %e, "frame capture failed, skipping"),
            }
        }
        delivered
    }

    /// Like [`run`](Self::run) but stops as soon as `on_frame` returns `false`
    pub fn run_until<F>(&self, session: &mut CameraSession<'_>, mut on_frame: F) -> usize
    where
        F: FnMut(usize, RgbImage) -> bool,
    {
        let mut delivered = 0;
        for slot in 0..self.frames {
            if slot > 0 && !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
            match session.read() {
                Ok(frame) => {
                    delivered += 1;
                    if !on_frame(slot, frame) {
                        break;
                    }
                }
                Err(e) => warn!(slot, error = %e, "frame capture failed, skipping"),
            }
        }
        delivered
    }
}

/// Stand-in used when no camera is attached: every open fails, so callers
/// fall back to their fail policy
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingCamera;

impl Camera for MissingCamera {
    fn open(&mut self) -> Result<(), VerifyError> {
        Err(VerifyError::CameraUnavailable("no camera configured".to_string()))
    }

    fn read(&mut self) -> Result<RgbImage, VerifyError> {
        Err(VerifyError::CaptureError("no camera configured".to_string()))
    }

    fn close(&mut self) {}

    fn describe(&self) -> String {
        "no camera".to_string()
    }
}
