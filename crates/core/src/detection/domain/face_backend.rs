use crate::detection::domain::embedding::Embedding;
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Face localization and embedding capability, consumed as a black box.
///
/// Implementations may hold inference sessions that need exclusive access,
/// hence `&mut self`. Output must be deterministic for identical input.
pub trait FaceBackend: Send {
    /// Bounding boxes of every face found in the frame.
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<Region>, DetectionError>;

    /// Identity embedding of the face inside `region`.
    fn embed(&mut self, frame: &Frame, region: &Region) -> Result<Embedding, DetectionError>;
}
