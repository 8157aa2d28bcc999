//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of PaddleOCR models, and defines
//! the seams the engine talks to: [`ResourceProvider`] for getting model files
//! onto disk, [`SessionFactory`] / [`InferenceSession`] for running them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use ndarray::{Array4, ArrayD};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::TensorRef;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::OcrError;

/// Environment variable that disables model downloads
pub const OFFLINE_ENV_VAR: &str = "SCREEN_OCR_OFFLINE";

/// Files making up one language's OCR resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN/SVTR)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [ModelType::Detection, ModelType::Recognition, ModelType::Dictionary];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// Download URL under `base_url`. Detection is shared by all languages.
    pub fn download_url(&self, base_url: &str, language: &str) -> String {
        let base_url = base_url.trim_end_matches('/');
        match self {
            ModelType::Detection => format!("{}/detection/v3/det.onnx", base_url),
            ModelType::Recognition => format!("{}/languages/{}/rec.onnx", base_url, language),
            ModelType::Dictionary => format!("{}/languages/{}/dict.txt", base_url, language),
        }
    }

    /// Smallest plausible file size, to reject truncated downloads
    pub fn min_size(&self) -> u64 {
        match self {
            ModelType::Detection => 100_000,
            ModelType::Recognition => 100_000,
            ModelType::Dictionary => 1,
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Paths of the three resource files for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub dictionary: PathBuf,
}

/// Guarantees model files are present and says where they are.
///
/// The engine doesn't care whether files come from local disk or a download.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Make sure the resources for `language` exist; `false` if they can't be provided
    async fn ensure_ocr_ready(&self, language: &str) -> Result<bool>;

    /// Where the resources for `language` live
    fn model_paths(&self, language: &str) -> Result<ModelPaths>;
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub language: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: String,
}

/// Progress callback for download operations
pub type DownloadProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

impl ModelManifest {
    fn new(language: &str) -> Self {
        Self {
            version: "1.0.0".to_string(),
            language: language.to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches per-language models under `<models_dir>/<language>/`
pub struct ModelManager {
    models_dir: PathBuf,
    base_url: String,
}

impl ModelManager {
    /// Create a model manager rooted in the application data directory
    pub fn new(base_url: &str) -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"), base_url)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf, base_url: &str) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            base_url: base_url.to_string(),
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Directory holding one language's files
    pub fn language_dir(&self, language: &str) -> Result<PathBuf> {
        validate_language(language)?;
        Ok(self.models_dir.join(language))
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, language: &str, model_type: ModelType) -> Result<PathBuf> {
        Ok(self.language_dir(language)?.join(model_type.filename()))
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, language: &str, model_type: ModelType) -> bool {
        let Ok(path) = self.model_path(language, model_type) else {
            return false;
        };

        match std::fs::metadata(&path) {
            Ok(metadata) => metadata.is_file() && metadata.len() >= model_type.min_size(),
            Err(_) => false,
        }
    }

    /// Check if all required models are available
    pub fn are_models_ready(&self, language: &str) -> bool {
        ModelType::ALL
            .iter()
            .all(|&model_type| self.is_model_available(language, model_type))
    }

    /// Get status of all models
    pub fn get_model_status(&self, language: &str) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let available = self.is_model_available(language, model_type);
                let size = self
                    .model_path(language, model_type)
                    .ok()
                    .and_then(|path| std::fs::metadata(path).ok())
                    .map(|m| m.len());
                (model_type, available, size)
            })
            .collect()
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub async fn ensure_model(&self, language: &str, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(language, model_type)?;
        if self.is_model_available(language, model_type) {
            debug!("Model {:?} for '{}' already available at {:?}", model_type, language, path);
            return Ok(path);
        }

        info!("Downloading model {:?} for '{}'...", model_type, language);
        self.download_model_with_progress(language, model_type, None).await?;

        Ok(path)
    }

    /// Download a specific model with optional progress callback
    pub async fn download_model_with_progress(
        &self,
        language: &str,
        model_type: ModelType,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<()> {
        let url = model_type.download_url(&self.base_url, language);
        let path = self.model_path(language, model_type)?;

        info!("Downloading {} model from {}", model_type.display_name(), url);

        if std::env::var(OFFLINE_ENV_VAR).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let hash = download_file_async(&url, &path, progress).await?;

        if !self.is_model_available(language, model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(language, model_type, hash)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    /// Update manifest after successful download
    fn update_manifest_for_model(&self, language: &str, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self
            .load_manifest(language)
            .unwrap_or_else(|_| ModelManifest::new(language));

        let path = self.model_path(language, model_type)?;
        let metadata = std::fs::metadata(&path)?;

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256: Some(sha256),
            downloaded_at: unix_timestamp(),
        };

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(language, &manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self, language: &str) -> Result<ModelManifest> {
        let manifest_path = self.language_dir(language)?.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::new(language))
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, language: &str, manifest: &ModelManifest) -> Result<()> {
        let language_dir = self.language_dir(language)?;
        std::fs::create_dir_all(&language_dir)?;
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(language_dir.join("manifest.json"), content)?;
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for ModelManager {
    async fn ensure_ocr_ready(&self, language: &str) -> Result<bool> {
        for model_type in ModelType::ALL {
            self.ensure_model(language, model_type).await?;
        }
        Ok(self.are_models_ready(language))
    }

    fn model_paths(&self, language: &str) -> Result<ModelPaths> {
        Ok(ModelPaths {
            detector: self.model_path(language, ModelType::Detection)?,
            recognizer: self.model_path(language, ModelType::Recognition)?,
            dictionary: self.model_path(language, ModelType::Dictionary)?,
        })
    }
}

/// Stream `url` into `path` through a temp file. Returns the SHA-256 hex digest.
async fn download_file_async(
    url: &str,
    path: &Path,
    progress: Option<DownloadProgressCallback>,
) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300)) // 5 minute timeout
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;

        file.write_all(&chunk).context("Failed to write to temp file")?;

        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        if let Some(ref callback) = progress {
            callback(downloaded, total_size);
        }
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Language names become directory names; keep them to one plain path component
fn validate_language(language: &str) -> Result<()> {
    let valid = !language.is_empty()
        && language != "."
        && language != ".."
        && language
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid {
        anyhow::bail!("Invalid language identifier '{}'", language);
    }
    Ok(())
}

/// Seconds since the Unix epoch, as a string
fn unix_timestamp() -> String {
    use std::time::SystemTime;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    format!("{}", now)
}

/// A loaded model that maps an input tensor to an output tensor.
///
/// Output rank and axis order are engine-defined; callers interpret them.
pub trait InferenceSession: Send {
    fn run(&mut self, input: &Array4<f32>) -> crate::error::Result<ArrayD<f32>>;
}

/// Builds inference sessions from model files
pub trait SessionFactory: Send + Sync {
    fn create(&self, model_type: ModelType, path: &Path) -> crate::error::Result<Box<dyn InferenceSession>>;
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a CPU-only session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> crate::error::Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let builder = cpu_builder(intra_threads).map_err(|e| load_error(model_path, e))?;
        Self::commit(builder, model_path)
    }

    /// Create session with GPU acceleration if available
    ///
    /// Provider registration failures are logged and the session falls back to CPU.
    pub fn new_with_gpu(model_path: &Path, intra_threads: usize) -> crate::error::Result<Self> {
        info!("Loading ONNX model with GPU acceleration from {:?}", model_path);

        let builder = cpu_builder(intra_threads).map_err(|e| load_error(model_path, e))?;

        #[cfg(target_os = "windows")]
        let providers = [
            ort::execution_providers::CUDAExecutionProvider::default().build(),
            ort::execution_providers::DirectMLExecutionProvider::default().build(),
        ];
        #[cfg(not(target_os = "windows"))]
        let providers = [ort::execution_providers::CUDAExecutionProvider::default().build()];

        let builder = match builder.with_execution_providers(providers) {
            Ok(builder) => {
                info!("GPU execution providers registered");
                builder
            }
            Err(e) => {
                warn!("GPU execution providers not available, using CPU: {}", e);
                cpu_builder(intra_threads).map_err(|e| load_error(model_path, e))?
            }
        };

        Self::commit(builder, model_path)
    }

    fn commit(builder: SessionBuilder, model_path: &Path) -> crate::error::Result<Self> {
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| load_error(model_path, e))?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

impl InferenceSession for OnnxSession {
    fn run(&mut self, input: &Array4<f32>) -> crate::error::Result<ArrayD<f32>> {
        let input_tensor = TensorRef::from_array_view(input)
            .map_err(|e| OcrError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Inference(format!("Inference failed: {}", e)))?;

        // Models used here have a single output
        let (_, output_tensor) = outputs
            .iter()
            .next()
            .ok_or_else(|| OcrError::Inference("No output tensor found".to_string()))?;

        let output_array = output_tensor
            .try_extract_array::<f32>()
            .map_err(|e| OcrError::Inference(format!("Failed to extract output: {}", e)))?;

        Ok(output_array.to_owned())
    }
}

/// Creates [`OnnxSession`]s, optionally trying GPU providers first
#[derive(Debug, Clone)]
pub struct OnnxSessionFactory {
    pub use_gpu: bool,
    pub intra_threads: usize,
}

impl OnnxSessionFactory {
    pub fn new(use_gpu: bool, intra_threads: usize) -> Self {
        Self {
            use_gpu,
            intra_threads: intra_threads.max(1),
        }
    }
}

impl SessionFactory for OnnxSessionFactory {
    fn create(&self, model_type: ModelType, path: &Path) -> crate::error::Result<Box<dyn InferenceSession>> {
        debug!("Creating {} session", model_type.display_name());
        let session = if self.use_gpu {
            OnnxSession::new_with_gpu(path, self.intra_threads)?
        } else {
            OnnxSession::new(path, self.intra_threads)?
        };
        Ok(Box::new(session))
    }
}

fn cpu_builder(intra_threads: usize) -> std::result::Result<SessionBuilder, String> {
    Session::builder()
        .map_err(|e| e.to_string())?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| e.to_string())?
        .with_intra_threads(intra_threads)
        .map_err(|e| e.to_string())
}

fn load_error(path: &Path, message: impl std::fmt::Display) -> OcrError {
    OcrError::ModelLoad {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
