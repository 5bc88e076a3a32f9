use std::path::Path;

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Decodes a video file into frames.
///
/// Implementations handle I/O details (codec, container format, etc.)
/// while the pipeline works with the abstract `Frame` and `VideoMetadata`
/// types. Readers never write to the source.
pub trait VideoReader: Send {
    /// Opens a video file and returns its metadata.
    ///
    /// Fails with [`DetectionError::Media`] when the file is unreadable or has
    /// no video stream.
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, DetectionError>;

    /// Returns an iterator over every decoded frame in decode order.
    ///
    /// A corrupt frame yields [`DetectionError::FrameDecode`] for its position
    /// and iteration continues with the next one.
    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, DetectionError>> + '_>;

    /// Releases any resources held by the reader.
    fn close(&mut self);
}
