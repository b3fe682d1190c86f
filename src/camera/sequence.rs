//! Image-sequence camera
//!
//! Replays a directory of still images as if they were live captures. Useful
//! for bench testing a node without hardware and for reproducing field
//! recordings.

use super::Camera;
use crate::error::VerifyError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone)]
pub struct ImageSequenceCamera {
    source: PathBuf,
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    opened: bool,
}

impl ImageSequenceCamera {
    /// Use every image file in `dir`, in file-name order
    pub fn from_dir(dir: &Path, looping: bool) -> Result<Self, VerifyError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();
        Ok(Self::from_paths(dir.to_path_buf(), paths, looping))
    }

    pub fn from_paths(source: PathBuf, paths: Vec<PathBuf>, looping: bool) -> Self {
        Self {
            source,
            paths,
            cursor: 0,
            looping,
            opened: false,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl Camera for ImageSequenceCamera {
    fn open(&mut self) -> Result<(), VerifyError> {
        if self.paths.is_empty() {
            return Err(VerifyError::CameraUnavailable(format!(
                "no images in {}",
                self.source.display()
            )));
        }
        self.opened = true;
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, VerifyError> {
        if !self.opened {
            return Err(VerifyError::CaptureError("sequence not open".to_string()));
        }
        if self.cursor >= self.paths.len() {
            if !self.looping {
                return Err(VerifyError::CaptureError("sequence exhausted".to_string()));
            }
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        self.cursor += 1;
        debug!(path = %path.display(), "reading frame");
        let frame = image::open(path)
            .map_err(|e| VerifyError::CaptureError(format!("{}: {e}", path.display())))?;
        Ok(frame.to_rgb8())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.source.display())
    }
}
