use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Outcome of a face-covering check on one face region.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MaskAssessment {
    pub detected: bool,
    /// Likelihood in `[0, 1]`; `detected` is true exactly when this exceeds 0.5.
    pub confidence: f64,
}

impl MaskAssessment {
    pub fn from_confidence(confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            detected: confidence > 0.5,
            confidence,
        }
    }
}

/// Estimates whether the lower face is covered, independent of identity.
///
/// Implementations must clamp `region` to the frame before reading pixels
/// and return [`MaskAssessment::default`] when there is too little to go on.
pub trait MaskScorer: Send {
    fn assess(&self, frame: &Frame, region: &Region) -> MaskAssessment;
}

/// Portion of the face box below the eye line.
const LOWER_FACE_FRACTION: f64 = 0.5;

/// Smallest analyzable lower-face patch, per side.
const MIN_PATCH_SIDE: i32 = 8;

/// Texture heuristic: fabric over mouth and nose is far flatter than skin
/// with lips, nostrils and shadows.
///
/// Measures the grayscale standard deviation of the lower half of the face.
/// A deviation of 0 maps to confidence 1, `threshold` maps to 0.5 and
/// `2 * threshold` or more maps to 0.
pub struct LowerFaceTextureScorer {
    threshold: f64,
}

impl LowerFaceTextureScorer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl MaskScorer for LowerFaceTextureScorer {
    fn assess(&self, frame: &Frame, region: &Region) -> MaskAssessment {
        let Some(visible) = region.clamp_to(frame.width(), frame.height()) else {
            return MaskAssessment::default();
        };
        let Some(patch) = visible
            .bottom_part(LOWER_FACE_FRACTION)
            .clamp_to(frame.width(), frame.height())
        else {
            return MaskAssessment::default();
        };
        if patch.width < MIN_PATCH_SIDE || patch.height < MIN_PATCH_SIDE {
            return MaskAssessment::default();
        }
        if self.threshold <= 0.0 {
            return MaskAssessment::default();
        }

        let std = gray_std(frame, &patch);
        MaskAssessment::from_confidence(1.0 - std / (2.0 * self.threshold))
    }
}

/// Standard deviation of BT.601 luma over an in-bounds region.
fn gray_std(frame: &Frame, patch: &Region) -> f64 {
    let channels = frame.channels() as usize;
    let width = frame.width() as usize;
    let data = frame.data();

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in patch.y as usize..(patch.y + patch.height) as usize {
        let row = y * width * channels;
        for x in patch.x as usize..(patch.x + patch.width) as usize {
            let p = row + x * channels;
            let gray = if channels >= 3 {
                0.299 * data[p] as f64 + 0.587 * data[p + 1] as f64 + 0.114 * data[p + 2] as f64
            } else {
                data[p] as f64
            };
            sum += gray;
            sum_sq += gray * gray;
            n += 1.0;
        }
    }
    if n == 0.0 {
        return 0.0;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}
