use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::job_state::JobStatus;
use crate::shared::model_resolver::ModelResolveError;

/// Failure taxonomy for a detection job.
///
/// Only [`DetectionError::FrameDecode`] is recoverable; every other variant
/// either prevents the job from reaching `Running` or moves it to `Failed`.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("cannot open video {path}: {reason}")]
    Media { path: PathBuf, reason: String },

    #[error("cannot write video {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("failed to decode frame {index}: {reason}")]
    FrameDecode { index: usize, reason: String },

    #[error("no face found in reference image {path}")]
    NoFaceFound { path: PathBuf },

    #[error("reference image {path} contains {faces} faces, expected exactly one")]
    AmbiguousFace { path: PathBuf, faces: usize },

    #[error("subject '{subject}' has no reference images")]
    EmptyGallery { subject: String },

    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("cannot {action} a job that is {from}")]
    InvalidTransition { from: JobStatus, action: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("inference backend error: {0}")]
    Inference(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("report serialization failed: {0}")]
    Report(#[from] serde_json::Error),

    #[error(transparent)]
    ModelResolve(#[from] ModelResolveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DetectionError {
    pub(crate) fn inference(err: impl std::fmt::Display) -> Self {
        DetectionError::Inference(err.to_string())
    }
}
