//! imgload - Command-line front end for the image-loading engine
//!
//! Loads every file named on the command line with its own [`Engine`], all
//! sharing one [`DecodeArbiter`], and prints what each produced.
//!
//! # Usage
//!
//! ```text
//! imgload [--animate] [--thumbnails] FILE...
//! ```
//!
//! - `--animate`: keep GIF animations instead of collapsing them to the first frame
//! - `--thumbnails`: decode through the thumbnail cache configured in `imgload.yaml`
//!
//! # Execution Flow
//!
//! 1. Load `imgload.yaml` (plus `IMGLOAD_*` overrides) from the working directory
//! 2. Initialize logging → logs/imgload.<date>
//! 3. Create one engine per file and start them all
//! 4. Settle each engine on a single-threaded tokio runtime
//! 5. Print results, shut the engines down and log a metrics summary

use anyhow::{Context, Result, bail};
use imgload::models::LoaderConfig;
use imgload::services::{Decoder, StillImageDecoder, ThumbnailCacheDecoder};
use imgload::{APP_NAME, ConfigManager, DecodeArbiter, Engine, EngineStatus, Metrics, VERSION};
use std::sync::Arc;

struct Args {
    animate: bool,
    thumbnails: bool,
    files: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        animate: false,
        thumbnails: false,
        files: Vec::new(),
    };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--animate" => args.animate = true,
            "--thumbnails" => args.thumbnails = true,
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            _ => args.files.push(arg),
        }
    }

    if args.files.is_empty() {
        bail!("Usage: {} [--animate] [--thumbnails] FILE...", APP_NAME);
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let config_manager = ConfigManager::new(".")?;
    let config = config_manager.load()?;

    let _log_guard = imgload::logging::setup_from_config(&config.logging)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Engines are not Send; everything stays on this thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let metrics = Arc::new(Metrics::new());
    let failures = runtime.block_on(load_all(&args, &config, &metrics))?;

    metrics.log_summary();
    tracing::info!("Shutdown complete");

    if failures > 0 {
        bail!("{} of {} file(s) failed to load", failures, args.files.len());
    }
    Ok(())
}

async fn load_all(args: &Args, config: &LoaderConfig, metrics: &Arc<Metrics>) -> Result<usize> {
    let arbiter = DecodeArbiter::new();
    let decoder: Arc<dyn Decoder> = if args.thumbnails {
        Arc::new(ThumbnailCacheDecoder::from_config(&config.thumbnails))
    } else {
        Arc::new(StillImageDecoder::new())
    };

    let mut engines = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let mut engine = Engine::builder(arbiter.clone())
            .config(&config.engine)
            .decoder(Arc::clone(&decoder))
            .metrics(Arc::clone(metrics))
            .source(file.as_str())
            .as_animation(args.animate)
            .build()?;
        engine.start()?;
        engines.push(engine);
    }

    let mut failures = 0;
    for mut engine in engines {
        let status = engine.settle().await;
        let source = engine.source().map(|s| s.to_string()).unwrap_or_default();

        match (status, engine.get_result(), engine.last_error()) {
            (EngineStatus::Done, Some(image), _) => {
                let (width, height) = image.dimensions().unwrap_or_default();
                let (original_width, original_height) = image.original_size().unwrap_or_default();
                println!(
                    "{}: {}x{} (original {}x{}), {} frame(s), {:?}",
                    source,
                    width,
                    height,
                    original_width,
                    original_height,
                    image.frame_count(),
                    engine.elapsed()
                );
            }
            (_, _, Some(error)) => {
                failures += 1;
                println!("{}: error: {}", source, error);
            }
            (status, _, _) => {
                failures += 1;
                println!("{}: ended {}", source, status);
            }
        }

        engine.shutdown()?;
    }

    Ok(failures)
}
