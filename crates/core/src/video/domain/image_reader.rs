use std::path::Path;

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;

/// Loads a still image (e.g. a reference photo) as an RGB frame.
pub trait ImageReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Frame, DetectionError>;
}
