//! Recent-frame buffer
//!
//! Fixed-capacity FIFO of preprocessed frames used for frame-to-frame
//! differencing. The oldest frame is evicted when the buffer is full.

use image::GrayImage;
use std::collections::VecDeque;

/// Default number of frames kept
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<GrayImage>,
    capacity: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_BUFFER_SIZE)
    }
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full
    pub fn push(&mut self, frame: GrayImage) {
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    /// Most recently pushed frame
    pub fn latest(&self) -> Option<&GrayImage> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Frames in capture order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &GrayImage> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frame(value: u8) -> GrayImage {
        GrayImage::from_pixel(2, 2, Luma([value]))
    }

    #[test]
    fn test_eviction_keeps_capture_order() {
        let mut buffer = FrameBuffer::new(3);
        for v in 1..=5 {
            buffer.push(frame(v));
            assert!(buffer.len() <= 3);
        }

        let kept: Vec<u8> = buffer.iter().map(|f| f.get_pixel(0, 0)[0]).collect();
        assert_eq!(kept, vec![3, 4, 5]);
        assert_eq!(buffer.latest().unwrap().get_pixel(0, 0)[0], 5);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut buffer = FrameBuffer::new(0);
        buffer.push(frame(1));
        buffer.push(frame(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::default();
        buffer.push(frame(9));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
    }
}
