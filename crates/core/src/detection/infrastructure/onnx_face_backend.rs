use std::path::Path;

use crate::detection::domain::embedding::Embedding;
use crate::detection::domain::face_backend::FaceBackend;
use crate::detection::infrastructure::arcface_embedder::ArcFaceEmbedder;
use crate::detection::infrastructure::onnx_yolo_locator::{OnnxYoloLocator, DEFAULT_CONFIDENCE};
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::model_resolver::{
    ModelResolver, ProgressFn, FACE_EMBEDDING_MODEL, FACE_LOCATOR_MODEL,
};
use crate::shared::region::Region;

/// [`FaceBackend`] built from a YOLO face model and an ArcFace model.
pub struct OnnxFaceBackend {
    locator: OnnxYoloLocator,
    embedder: ArcFaceEmbedder,
}

impl OnnxFaceBackend {
    pub fn new(locator_model: &Path, embedder_model: &Path) -> Result<Self, DetectionError> {
        Ok(Self {
            locator: OnnxYoloLocator::new(locator_model, DEFAULT_CONFIDENCE)?,
            embedder: ArcFaceEmbedder::new(embedder_model)?,
        })
    }

    /// Resolves both models through `resolver`, downloading any that are
    /// missing, then loads them.
    pub fn from_resolver(
        resolver: &ModelResolver,
        mut progress: impl FnMut(&'static str) -> Option<ProgressFn>,
    ) -> Result<Self, DetectionError> {
        let locator_path =
            resolver.resolve(&FACE_LOCATOR_MODEL, progress(FACE_LOCATOR_MODEL.name))?;
        let embedder_path =
            resolver.resolve(&FACE_EMBEDDING_MODEL, progress(FACE_EMBEDDING_MODEL.name))?;
        Self::new(&locator_path, &embedder_path)
    }
}

impl FaceBackend for OnnxFaceBackend {
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<Region>, DetectionError> {
        self.locator.locate(frame)
    }

    fn embed(&mut self, frame: &Frame, region: &Region) -> Result<Embedding, DetectionError> {
        self.embedder.embed(frame, region)
    }
}
