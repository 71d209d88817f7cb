//! clip_saverd - activity clip saver daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured sources
//! 2. Runs the configured detector over the newest frame of each source
//! 3. Groups detections into activity windows
//! 4. Persists the frames kept by the retention policy when a window closes

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clip_saver::{
    build_source, BackendRegistry, ClipSaverConfig, DetectionCapability, DetectionWindow,
    LogCallback, ManifestPersister, Orchestrator, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "CLIP_SAVER_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many ticks (smoke runs).
    #[arg(long)]
    max_ticks: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = ClipSaverConfig::load_from(args.config.as_deref())?;

    let sources = cfg
        .sources
        .iter()
        .map(build_source)
        .collect::<Result<Vec<_>>>()?;

    let mut registry = BackendRegistry::with_builtin();
    log::info!("detector backends: {}", registry.list().join(", "));
    let detector = registry.take(&cfg.detector.backend)?;
    if cfg.retention.requires_tracking() && !detector.supports(DetectionCapability::Tracking) {
        log::warn!(
            "retention policy needs track ids but detector {} does not track; frames will be ignored",
            detector.name()
        );
    }

    let persister = ManifestPersister::new(&cfg.output_dir)?;
    let mut window = DetectionWindow::new(cfg.window, cfg.retention.build())?
        .with_persister(Box::new(persister));
    if !cfg.labels.is_empty() {
        window = window.with_labels(cfg.labels.clone());
    }
    window.add_callback(Box::new(LogCallback::new(Some(cfg.labels.clone()))));

    let mut orchestrator = Orchestrator::new(sources, detector, window, Arc::new(SystemClock))?
        .with_filters(cfg.detector.filters())
        .with_poll_interval(cfg.poll_interval);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "clip_saverd running. writing clips to {}",
        cfg.output_dir.display()
    );
    orchestrator.run_for(&shutdown, args.max_ticks)?;
    log::info!("clip_saverd stopped");
    Ok(())
}
