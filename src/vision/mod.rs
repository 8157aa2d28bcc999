//! Vision/OCR Layer
//!
//! Text detection and recognition on captured screen regions with PaddleOCR
//! models via ONNX Runtime.
//!
//! Pipeline: preprocess → detector → probability map → box finder →
//! (per box) crop preparation → recognizer → CTC decode.

pub mod ctc;
pub mod detection;
pub mod dictionary;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod prob_map;

pub use ctc::RecognitionResult;
pub use detection::DetectionBox;
pub use dictionary::Dictionary;
pub use models::{
    InferenceSession, ModelManager, ModelPaths, ModelType, OnnxSession, OnnxSessionFactory,
    ResourceProvider, SessionFactory,
};
pub use ocr::{OcrEngine, TextRegion};
