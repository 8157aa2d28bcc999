//! OCR engine
//!
//! Owns the loaded detector, recognizer and dictionary for one language and
//! runs the detect / recognize pipeline over RGBA bitmaps.

use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ctc::{self, RecognitionResult};
use super::detection::{find_boxes, DetectionBox};
use super::dictionary::Dictionary;
use super::models::{
    InferenceSession, ModelManager, ModelPaths, ModelType, OnnxSessionFactory, ResourceProvider,
    SessionFactory,
};
use super::ocr_preprocess::{crop_to_tensor, prepare_crop};
use super::preprocess::{build_tensor, detection_input_size};
use super::prob_map::build_map;
use crate::config::{OcrConfig, RecognitionParams};
use crate::error::{OcrError, Result};

/// Detected and recognized text region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    /// Recognized text
    pub text: String,
    /// Box in source-image pixels
    pub bounds: DetectionBox,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Everything needed to run OCR for one language
pub struct LoadedModels {
    pub language: String,
    detector: Box<dyn InferenceSession>,
    recognizer: Box<dyn InferenceSession>,
    pub dictionary: Dictionary,
}

/// Engine model state. Detector, recognizer and dictionary are present together or not at all.
#[derive(Default)]
pub enum ModelState {
    #[default]
    Unloaded,
    Loaded(LoadedModels),
}

/// OCR engine using PaddleOCR models
pub struct OcrEngine {
    config: OcrConfig,
    resources: Arc<dyn ResourceProvider>,
    sessions: Arc<dyn SessionFactory>,
    state: ModelState,
}

impl OcrEngine {
    pub fn new(
        config: OcrConfig,
        resources: Arc<dyn ResourceProvider>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            config,
            resources,
            sessions,
            state: ModelState::Unloaded,
        }
    }

    /// Engine backed by the on-disk model cache and ONNX Runtime sessions
    pub fn from_config(config: OcrConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| OcrError::Config(format!("{:#}", e)))?;

        let manager = match &config.models_dir {
            Some(dir) => ModelManager::with_dir(dir.clone(), &config.model_base_url),
            None => ModelManager::new(&config.model_base_url),
        }
        .map_err(OcrError::Resource)?;

        let sessions = OnnxSessionFactory::new(config.use_gpu, config.intra_threads);

        Ok(Self::new(config, Arc::new(manager), Arc::new(sessions)))
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Language of the loaded models, if any
    pub fn language(&self) -> Option<&str> {
        match &self.state {
            ModelState::Loaded(models) => Some(&models.language),
            ModelState::Unloaded => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    pub fn dictionary(&self) -> Option<&Dictionary> {
        match &self.state {
            ModelState::Loaded(models) => Some(&models.dictionary),
            ModelState::Unloaded => None,
        }
    }

    /// Drop the loaded sessions and dictionary
    pub fn unload(&mut self) {
        if let ModelState::Loaded(models) = std::mem::take(&mut self.state) {
            info!("Unloaded OCR models for '{}'", models.language);
        }
    }

    /// Make sure models for `language` are loaded.
    ///
    /// Does nothing when they already are. Otherwise the current models are
    /// released first, so on any error (including cancellation) the engine is
    /// left unloaded. A cancelled load may still finish constructing sessions
    /// on the blocking pool; the result is discarded.
    pub async fn ensure_loaded(&mut self, language: &str, cancel: &CancellationToken) -> Result<()> {
        if self.language() == Some(language) {
            debug!("OCR models for '{}' already loaded", language);
            return Ok(());
        }

        self.unload();
        info!("Loading OCR models for '{}'", language);

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OcrError::Cancelled),
            ready = self.resources.ensure_ocr_ready(language) => ready.map_err(OcrError::Resource)?,
        };
        if !ready {
            return Err(OcrError::ResourcesUnavailable(language.to_string()));
        }

        let paths = self.resources.model_paths(language).map_err(OcrError::Resource)?;
        let sessions = Arc::clone(&self.sessions);
        let append_space = self.config.recognition.append_space_symbol;
        let owned_language = language.to_string();

        let task = tokio::task::spawn_blocking(move || {
            load_models(sessions.as_ref(), &paths, append_space, owned_language)
        });

        let models = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OcrError::Cancelled),
            joined = task => joined.map_err(|e| OcrError::Worker(e.to_string()))??,
        };

        info!(
            "OCR models for '{}' loaded ({} dictionary symbols)",
            language,
            models.dictionary.len()
        );
        self.state = ModelState::Loaded(models);
        Ok(())
    }

    /// Find text boxes in `bitmap`, in source-image pixels.
    ///
    /// Empty when nothing is loaded or the bitmap is empty. When the detector
    /// output can't be interpreted the whole image is returned as one box.
    pub fn detect_text(&mut self, bitmap: &RgbaImage) -> Result<Vec<DetectionBox>> {
        let ModelState::Loaded(models) = &mut self.state else {
            return Ok(Vec::new());
        };

        let (width, height) = bitmap.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let params = &self.config.detection;
        let (input_w, input_h) = detection_input_size(width, height, params.limit_side_len);
        let input = build_tensor(bitmap, input_w, input_h, &params.mean, &params.std);

        let output = models.detector.run(&input)?;

        let boxes = match build_map(output.view(), width, height) {
            Some((map, scale_x, scale_y)) => find_boxes(&map, scale_x, scale_y, width, height, params),
            None => {
                warn!(
                    "Unexpected detector output shape {:?}, using the whole image",
                    output.shape()
                );
                vec![DetectionBox::full(width, height)]
            }
        };

        debug!(
            "Detected {} text boxes in {}x{} image (input {}x{})",
            boxes.len(),
            width,
            height,
            input_w,
            input_h
        );
        Ok(boxes)
    }

    /// Recognize the text inside `bbox`.
    ///
    /// Dark crops are recognized twice, once inverted, and the better reading wins.
    pub fn recognize_text(&mut self, bitmap: &RgbaImage, bbox: &DetectionBox) -> Result<RecognitionResult> {
        let ModelState::Loaded(models) = &mut self.state else {
            return Ok(RecognitionResult::empty());
        };
        if bbox.is_empty() {
            return Ok(RecognitionResult::empty());
        }

        let params = &self.config.recognition;
        let Some(crop) = prepare_crop(bitmap, bbox, params) else {
            return Ok(RecognitionResult::empty());
        };

        let tolerance = self.config.decoder.class_count_tolerance;
        let normal = run_recognizer(models, &crop.normal, params, tolerance)?;

        let result = match &crop.inverted {
            Some(inverted_crop) => {
                let inverted = run_recognizer(models, inverted_crop, params, tolerance)?;
                debug!(
                    "Polarity check: normal {:?} ({:.3}), inverted {:?} ({:.3})",
                    normal.text, normal.confidence, inverted.text, inverted.confidence
                );
                pick_better(normal, inverted)
            }
            None => normal,
        };

        Ok(result)
    }

    /// Detect and recognize every text region in `bitmap`.
    ///
    /// Regions with empty text or confidence below `recognition.min_confidence`
    /// are dropped.
    pub fn recognize_all(&mut self, bitmap: &RgbaImage) -> Result<Vec<TextRegion>> {
        let boxes = self.detect_text(bitmap)?;
        let min_confidence = self.config.recognition.min_confidence;

        let mut regions = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let result = self.recognize_text(bitmap, &bbox)?;
            if result.is_empty() || result.confidence < min_confidence {
                continue;
            }
            regions.push(TextRegion {
                text: result.text,
                bounds: bbox,
                confidence: result.confidence,
            });
        }

        Ok(regions)
    }
}

/// Pick between the normal and inverted readings of the same crop.
///
/// A non-empty reading always beats an empty one; otherwise the higher
/// confidence wins, with ties going to the normal crop.
pub fn pick_better(normal: RecognitionResult, inverted: RecognitionResult) -> RecognitionResult {
    match (normal.is_empty(), inverted.is_empty()) {
        (true, false) => inverted,
        (false, true) => normal,
        _ if inverted.confidence > normal.confidence => inverted,
        _ => normal,
    }
}

fn run_recognizer(
    models: &mut LoadedModels,
    crop: &RgbaImage,
    params: &RecognitionParams,
    tolerance: usize,
) -> Result<RecognitionResult> {
    let input = crop_to_tensor(crop, params);
    let output = models.recognizer.run(&input)?;
    Ok(ctc::decode(output.view(), &models.dictionary, tolerance))
}

fn load_models(
    sessions: &dyn SessionFactory,
    paths: &ModelPaths,
    append_space: bool,
    language: String,
) -> Result<LoadedModels> {
    let detector = sessions.create(ModelType::Detection, &paths.detector)?;
    let recognizer = sessions.create(ModelType::Recognition, &paths.recognizer)?;
    let dictionary = Dictionary::load_with_options(&paths.dictionary, append_space)?;

    Ok(LoadedModels {
        language,
        detector,
        recognizer,
        dictionary,
    })
}
