use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::shared::error::DetectionError;

/// Return the preferred ONNX execution providers for the current platform.
///
/// Falls back to CPU if the platform-specific provider is unavailable.
pub fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Loads a model with the platform providers and all cores for intra-op work.
///
/// The pipeline runs one inference at a time, so inter-op parallelism stays at 1.
pub fn load_session(model_path: &Path) -> Result<Session, DetectionError> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let session = Session::builder()
        .map_err(DetectionError::inference)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(DetectionError::inference)?
        .with_inter_threads(1)
        .map_err(DetectionError::inference)?
        .with_intra_threads(intra_threads)
        .map_err(DetectionError::inference)?
        .with_execution_providers(preferred_execution_providers())
        .map_err(DetectionError::inference)?
        .commit_from_file(model_path)
        .map_err(|e| {
            DetectionError::Inference(format!("failed to load {}: {e}", model_path.display()))
        })?;
    log::info!("Loaded ONNX model {}", model_path.display());
    Ok(session)
}
