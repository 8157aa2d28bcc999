//! screen-ocr - scene-text detection and recognition for screen captures
//!
//! Runs PaddleOCR detection and recognition models through ONNX Runtime and
//! turns their raw tensors into text boxes and strings.

pub mod config;
pub mod error;
pub mod storage;
pub mod vision;

pub use config::OcrConfig;
pub use error::{OcrError, Result};
pub use vision::{DetectionBox, OcrEngine, RecognitionResult, TextRegion};
