//! screen-ocr - read text from a screenshot
//!
//! Loads an image, makes sure the PaddleOCR models for the requested language
//! are available (downloading them if needed) and prints what it finds.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use screen_ocr::config::{self, OcrConfig};
use screen_ocr::{storage, OcrEngine};

/// screen-ocr - scene-text detection and recognition
#[derive(Parser, Debug)]
#[command(name = "screen-ocr")]
#[command(about = "Detect and recognize text in a screen capture")]
struct Args {
    /// Image file to read
    image: PathBuf,

    /// Recognition language (overrides the config file)
    #[arg(short, long)]
    language: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding per-language model folders
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Disable GPU execution providers
    #[arg(long)]
    cpu: bool,

    /// Only run detection and print the boxes
    #[arg(long)]
    boxes_only: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = load_config(args.config.as_ref())?;
    if let Some(language) = &args.language {
        config.language = language.clone();
    }
    if let Some(dir) = &args.models_dir {
        config.models_dir = Some(dir.clone());
    }
    if args.cpu {
        config.use_gpu = false;
    }

    let bitmap = image::open(&args.image)
        .with_context(|| format!("Failed to open image {:?}", args.image))?
        .to_rgba8();
    info!("Loaded {:?} ({}x{})", args.image, bitmap.width(), bitmap.height());

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            ctrl_c_token.cancel();
        }
    });

    let language = config.language.clone();
    let mut engine = OcrEngine::from_config(config)?;
    engine
        .ensure_loaded(&language, &cancel)
        .await
        .with_context(|| format!("Failed to load OCR models for '{}'", language))?;

    let start = Instant::now();

    if args.boxes_only {
        let boxes = engine.detect_text(&bitmap)?;
        info!("Detection finished in {:?}: {} boxes", start.elapsed(), boxes.len());

        if args.json {
            println!("{}", serde_json::to_string_pretty(&boxes)?);
        } else {
            for b in &boxes {
                println!("{}\t{}\t{}\t{}", b.x, b.y, b.width, b.height);
            }
        }
        return Ok(());
    }

    let regions = engine.recognize_all(&bitmap)?;
    info!("OCR finished in {:?}: {} regions", start.elapsed(), regions.len());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&regions)?);
    } else {
        for region in &regions {
            let b = &region.bounds;
            println!(
                "[{}, {}, {}, {}] {:.3}\t{}",
                b.x, b.y, b.width, b.height, region.confidence, region.text
            );
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&PathBuf>) -> Result<OcrConfig> {
    if let Some(path) = explicit {
        return config::load_config(path).with_context(|| format!("Failed to load config {:?}", path));
    }

    match storage::default_config_path() {
        Ok(path) => config::load_or_default(&path),
        Err(e) => {
            warn!("No config directory ({}), using defaults", e);
            Ok(OcrConfig::default())
        }
    }
}
