use std::path::PathBuf;
use std::time::Duration;

/// Rate assumed when the container reports none.
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container-reported frame count; 0 when the container does not say.
    pub total_frames: usize,
    pub codec: String,
    pub source_path: Option<PathBuf>,
}

impl VideoMetadata {
    /// Presentation time of the frame at decode position `index`, or `None`
    /// for sources without a usable frame rate.
    pub fn timestamp_of(&self, index: usize) -> Option<Duration> {
        self.has_valid_fps()
            .then(|| Duration::from_secs_f64(index as f64 / self.fps))
    }

    /// The reported frame rate, or [`FALLBACK_FPS`] when it is unusable.
    pub fn nominal_fps(&self) -> f64 {
        if self.has_valid_fps() {
            self.fps
        } else {
            FALLBACK_FPS
        }
    }

    fn has_valid_fps(&self) -> bool {
        self.fps > 0.0 && self.fps.is_finite()
    }

    pub fn frame_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}
