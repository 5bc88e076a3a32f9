use std::path::PathBuf;
use std::time::Duration;

/// One closed appearance of a subject. Never mutated once stored.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    pub event_id: u64,
    pub subject_id: String,
    pub first_frame_index: usize,
    pub last_frame_index: usize,
    /// When the subject first appeared in this track.
    pub timestamp: Duration,
    pub confidence: f64,
    pub mask_detected: bool,
    pub mask_confidence: f64,
    /// Frame the saved crop and `confidence` come from.
    pub best_frame_index: usize,
    pub saved_face_image_path: Option<PathBuf>,
    /// Short recording covering the start of this appearance.
    pub clip_path: Option<PathBuf>,
}

/// Formats as `H:MM:SS.mmm`.
pub fn format_timestamp(timestamp: Duration) -> String {
    let total_ms = timestamp.as_millis();
    let ms = total_ms % 1000;
    let secs = (total_ms / 1000) % 60;
    let mins = (total_ms / 60_000) % 60;
    let hours = total_ms / 3_600_000;
    format!("{hours}:{mins:02}:{secs:02}.{ms:03}")
}
