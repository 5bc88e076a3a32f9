use std::path::Path;

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Abstracts video encoding so detection clips can be written without
/// depending on a specific codec library.
pub trait VideoWriter: Send {
    /// Starts a new file at `path` sized and timed after `metadata`.
    fn open(&mut self, path: &Path, metadata: &VideoMetadata) -> Result<(), DetectionError>;

    /// Appends one RGB frame. Its dimensions must match the opened stream.
    fn write(&mut self, frame: &Frame) -> Result<(), DetectionError>;

    /// Flushes and finalizes the file. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), DetectionError>;
}
