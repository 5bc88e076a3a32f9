use std::path::Path;
use std::time::Duration;

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::video::domain::image_reader::ImageReader;

/// Loads still images with the `image` crate, converting to RGB8.
///
/// Reference photos are small enough that the pure-Rust decoder is fast
/// and avoids spinning up an ffmpeg demuxer per photo.
pub struct ImageFileReader;

impl ImageFileReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageFileReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageReader for ImageFileReader {
    fn read(&self, path: &Path) -> Result<Frame, DetectionError> {
        let img = image::open(path)?.to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Frame::new(
            img.into_raw(),
            width,
            height,
            3,
            0,
            Duration::ZERO,
        ))
    }
}
