/// ArcFace identity embeddings using ONNX Runtime.
///
/// Expects the InsightFace `w600k_r50` layout: a 112x112 RGB input
/// normalized with mean/std 127.5, producing a 512-d vector.
use std::path::Path;

use crate::detection::domain::embedding::Embedding;
use crate::detection::infrastructure::onnx_session::load_session;
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::region::Region;

const INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct ArcFaceEmbedder {
    session: ort::session::Session,
}

impl ArcFaceEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, DetectionError> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }

    pub fn embed(&mut self, frame: &Frame, region: &Region) -> Result<Embedding, DetectionError> {
        let crop = frame.crop(region).ok_or_else(|| {
            DetectionError::Inference(format!(
                "face region {region:?} lies outside the {}x{} frame",
                frame.width(),
                frame.height()
            ))
        })?;

        let tensor = preprocess(crop.data(), crop.width(), crop.height());
        let input_value =
            ort::value::Tensor::from_array(tensor).map_err(DetectionError::inference)?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(DetectionError::inference)?;
        let embedding_array = outputs[0]
            .try_extract_array::<f32>()
            .map_err(DetectionError::inference)?;
        let embedding_slice = embedding_array
            .as_slice()
            .ok_or_else(|| DetectionError::Inference("cannot get embedding slice".into()))?;

        Ok(Embedding::new(embedding_slice.to_vec()))
    }
}

/// Resize crop to 112x112, normalize, NCHW layout.
fn preprocess(rgb_data: &[u8], width: u32, height: u32) -> ndarray::Array4<f32> {
    let src_w = width as usize;
    let src_h = height as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..INPUT_SIZE {
            let src_x =
                (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * 3;
            if offset + 2 < rgb_data.len() {
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (rgb_data[offset + c] as f32 - NORM_MEAN) / NORM_STD;
                }
            }
        }
    }

    tensor
}
