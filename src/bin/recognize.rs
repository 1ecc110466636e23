//! recognize - Run every configured model over image files.
//!
//! Prints one JSON line per image:
//! `{"image": "<path>", "results": [ {"predictions": [...], "type": "<model>"} ]}`
//! with `"results": null` when the image could not be decoded.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ensemble_recognizer::{
    BackendRegistry, FrameStream, ImageInput, RecognitionResult, Recognizer, RecognizerConfig,
    ResultOrder, RgbFrame,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Recognize objects with an ensemble of models")]
struct Args {
    /// Config file (.toml or .json). Defaults to RECOGNIZER_CONFIG.
    #[arg(long, env = "RECOGNIZER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Report results in model configuration order instead of completion order.
    #[arg(long)]
    ordered: bool,

    /// Join timeout in milliseconds (0 waits for every model).
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Drop same-object duplicates within each model's predictions.
    #[arg(long)]
    dedup: bool,

    /// Images to recognize.
    #[arg(required = true, value_name = "IMAGE")]
    images: Vec<PathBuf>,
}

/// Image file decoded lazily, right before its frame is recognized.
struct ImageFile {
    image: Option<image::DynamicImage>,
}

impl ImageFile {
    fn open(path: &Path) -> Self {
        let image = match image::open(path) {
            Ok(image) => Some(image),
            Err(err) => {
                log::warn!("failed to open {}: {}", path.display(), err);
                None
            }
        };
        Self { image }
    }
}

impl ImageInput for ImageFile {
    fn to_rgb_frame(&self) -> Option<RgbFrame> {
        self.image.as_ref()?.to_rgb_frame()
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = RecognizerConfig::load_from(args.config.as_deref())?;
    if args.ordered {
        cfg.result_order = ResultOrder::Configured;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.join_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }

    let registry = BackendRegistry::from_config(&cfg)?;
    if registry.usable_count() == 0 {
        log::warn!("no usable models configured; every image will report no results");
    }
    registry.warm_up().context("model warm-up failed")?;
    let recognizer = Recognizer::with_settings(registry, cfg.settings())?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let frames = args.images.iter().map(|path| ImageFile::open(path));
    let mut sink = |index: u64, results: Option<&[RecognitionResult]>| -> Result<()> {
        let path = usize::try_from(index)
            .ok()
            .and_then(|i| args.images.get(i))
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let line = serde_json::json!({ "image": path, "results": results });
        println!("{}", serde_json::to_string(&line)?);
        Ok(())
    };

    let stats = FrameStream::new(&recognizer)
        .with_stop_flag(stop)
        .with_duplicate_suppression(args.dedup)
        .run(frames, &mut sink)?;
    log::info!(
        "recognized {} image(s) ({} unreadable) in {:.2?}",
        stats.frames,
        stats.rejected_frames,
        stats.elapsed
    );
    Ok(())
}
