//! Polling loop tying sources, detector and detection window together.
//!
//! One tick:
//! 1. pull the latest frame from every source (sources with nothing skip)
//! 2. run the detector once over the batch
//! 3. filter detections, stamp each result into an immutable `Frame`
//! 4. feed the frames to the window in source order
//! 5. flush the window if a boundary was reached

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::clock::Clock;
use crate::detect::{DetectorBackend, FilterChain};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::persist::PersistError;
use crate::window::{DetectionWindow, FlushReport};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub frames_polled: usize,
    pub frames_with_detections: usize,
    pub flush: Option<FlushReport>,
}

pub struct Orchestrator {
    sources: Vec<Box<dyn FrameSource>>,
    detector: Box<dyn DetectorBackend>,
    filters: FilterChain,
    window: DetectionWindow,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    last_health_log: Instant,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Box<dyn FrameSource>>,
        mut detector: Box<dyn DetectorBackend>,
        window: DetectionWindow,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(anyhow!("at least one frame source is required"));
        }
        detector.warm_up()?;
        Ok(Self {
            sources,
            detector,
            filters: FilterChain::new(),
            window,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_health_log: Instant::now(),
        })
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn window(&self) -> &DetectionWindow {
        &self.window
    }

    pub fn sources(&self) -> &[Box<dyn FrameSource>] {
        &self.sources
    }

    pub fn tick(&mut self) -> Result<TickReport> {
        let mut ids = Vec::with_capacity(self.sources.len());
        let mut images = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            if let Some(image) = source.get_latest_frame()? {
                ids.push(source.source_id().clone());
                images.push(image);
            }
        }

        let now = self.clock.now();
        let mut report = TickReport {
            frames_polled: images.len(),
            ..TickReport::default()
        };

        if !images.is_empty() {
            let results = self.detector.detect_sources(&ids, &images)?;
            if results.len() != images.len() {
                return Err(anyhow!(
                    "detector {} returned {} results for {} frames",
                    self.detector.name(),
                    results.len(),
                    images.len()
                ));
            }

            for ((image, id), detections) in images.into_iter().zip(ids).zip(results) {
                let detections = self.filters.apply(detections);
                let frame = Frame::new(image, detections, now, id);
                if self.window.observe(frame, now) {
                    report.frames_with_detections += 1;
                }
            }
        }

        report.flush = self.window.poll_flush(now)?;
        self.log_health();
        Ok(report)
    }

    /// Tick until `shutdown` is set, then stop sources and flush.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.run_for(shutdown, None)
    }

    /// Like `run`, but also stops after `max_ticks` ticks.
    pub fn run_for(&mut self, shutdown: &AtomicBool, max_ticks: Option<u64>) -> Result<()> {
        log::info!(
            "clip saver running: {} sources, detector {}, policy {}",
            self.sources.len(),
            self.detector.name(),
            self.window.policy().name()
        );

        let mut ticks = 0u64;
        let outcome = loop {
            if shutdown.load(Ordering::SeqCst) {
                log::info!("shutdown requested");
                break Ok(());
            }
            if max_ticks.is_some_and(|max| ticks >= max) {
                break Ok(());
            }

            match self.tick() {
                Ok(_) => {}
                // Window is already back to Idle; keep going.
                Err(err) if err.downcast_ref::<PersistError>().is_some() => {
                    log::error!("{:#}", err);
                }
                Err(err) => break Err(err),
            }
            ticks += 1;
            std::thread::sleep(self.poll_interval);
        };

        let finished = self.shutdown();
        outcome?;
        finished.map(|_| ())
    }

    /// Stop every source and flush an open window.
    pub fn shutdown(&mut self) -> Result<Option<FlushReport>> {
        for source in &mut self.sources {
            source.stop();
        }
        self.window.finish()
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        for source in &self.sources {
            let stats = source.stats();
            log::info!(
                "source {} health={} frames={} reconnects={}",
                source.source_id(),
                source.is_healthy(),
                stats.frames_captured,
                stats.reconnects
            );
        }
        self.last_health_log = Instant::now();
    }
}
