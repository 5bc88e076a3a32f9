use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::shared::constants::MAX_REFERENCE_IMAGES;
use crate::shared::error::DetectionError;

/// What the job does when a single frame fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Count the frame, log it, and continue with the next one.
    #[default]
    Skip,
    /// Treat the first decode failure as fatal.
    Abort,
}

impl std::fmt::Display for DecodeErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeErrorPolicy::Skip => write!(f, "skip"),
            DecodeErrorPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Tunables for one detection job, fixed at job construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Analyze every Nth decoded frame (1 = every frame).
    pub frame_skip: usize,
    /// Maximum embedding distance accepted as a match.
    pub match_threshold: f64,
    /// Lower-face grayscale standard deviation below which a mask is assumed.
    pub mask_threshold: f64,
    /// Frames (at native rate) a subject may go unmatched before its track closes.
    pub track_gap_tolerance: usize,
    pub max_faces_per_frame: usize,
    pub decode_error_policy: DecodeErrorPolicy,
    /// Capacity of the decoded-frame queue between the decoder and the matcher.
    pub max_pending_frames: usize,
    pub max_frame_pixels: u64,
    /// Reference photos used per subject, at most [`MAX_REFERENCE_IMAGES`].
    pub max_reference_images: usize,
    /// Length of the clip recorded from the start of each detection; 0
    /// disables clips.
    pub clip_duration_seconds: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            frame_skip: 5,
            match_threshold: 1.05,
            mask_threshold: 20.0,
            track_gap_tolerance: 10,
            max_faces_per_frame: 20,
            decode_error_policy: DecodeErrorPolicy::Skip,
            max_pending_frames: 8,
            max_frame_pixels: 7680 * 4320,
            max_reference_images: MAX_REFERENCE_IMAGES,
            clip_duration_seconds: 5.0,
        }
    }
}

impl DetectionConfig {
    /// Loads a JSON config; keys missing from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, DetectionError> {
        let json = fs::read_to_string(path)?;
        let config: DetectionConfig = serde_json::from_str(&json).map_err(|e| {
            DetectionError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        let invalid = |msg: String| Err(DetectionError::InvalidConfig(msg));
        if self.frame_skip == 0 {
            return invalid("frame_skip must be >= 1".into());
        }
        if self.max_faces_per_frame == 0 {
            return invalid("max_faces_per_frame must be >= 1".into());
        }
        if self.max_pending_frames == 0 {
            return invalid("max_pending_frames must be >= 1".into());
        }
        if !(1..=MAX_REFERENCE_IMAGES).contains(&self.max_reference_images) {
            return invalid(format!(
                "max_reference_images must be between 1 and {MAX_REFERENCE_IMAGES}, got {}",
                self.max_reference_images
            ));
        }
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            return invalid(format!(
                "match_threshold must be a non-negative number, got {}",
                self.match_threshold
            ));
        }
        if !self.mask_threshold.is_finite() || self.mask_threshold <= 0.0 {
            return invalid(format!(
                "mask_threshold must be a positive number, got {}",
                self.mask_threshold
            ));
        }
        if !self.clip_duration_seconds.is_finite() || self.clip_duration_seconds < 0.0 {
            return invalid(format!(
                "clip_duration_seconds must be a non-negative number, got {}",
                self.clip_duration_seconds
            ));
        }
        Ok(())
    }

    /// Gap tolerance actually applied, in native frames.
    ///
    /// Never smaller than the stride gap, so sampling alone cannot split a
    /// continuous appearance into several tracks.
    pub fn effective_gap_tolerance(&self) -> usize {
        self.track_gap_tolerance
            .max(self.frame_skip.saturating_sub(1))
    }
}
