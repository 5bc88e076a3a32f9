pub mod arcface_embedder;
pub mod math;
pub mod onnx_face_backend;
pub mod onnx_session;
pub mod onnx_yolo_locator;
