//! Resilient last-value frame source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;

use super::{FrameSource, SourceStats, StreamBackend};
use crate::frame::{RawImage, SourceId};

const SHUTDOWN_POLL: Duration = Duration::from_millis(20);
/// Floor for the retry wait; a zero delay would spin on `connect`.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

struct Shared {
    slot: Mutex<Option<RawImage>>,
    shutdown: AtomicBool,
    frames_captured: AtomicU64,
    reconnects: AtomicU64,
    consecutive_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn store(&self, image: Option<RawImage>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = image;
    }

    fn latest(&self) -> Option<RawImage> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, err: &anyhow::Error) -> u64 {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(format!("{:#}", err));
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Frame source backed by a dedicated reader thread.
///
/// The thread decodes frames as fast as the stream delivers them and keeps
/// only the newest one in a single slot. Read and connect failures release
/// the stream, wait `reconnect_delay` and reconnect, forever; while the stream
/// is down the slot is empty, so consumers see "no frame" rather than a stale
/// image.
pub struct LatestFrameSource {
    id: SourceId,
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl LatestFrameSource {
    pub fn spawn(
        id: SourceId,
        backend: Box<dyn StreamBackend>,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });

        let reader_shared = shared.clone();
        let reader_id = id.clone();
        let join = std::thread::Builder::new()
            .name(format!("ingest:{}", id))
            .spawn(move || run_reader(reader_id, backend, reader_shared, reconnect_delay))
            .with_context(|| format!("spawn reader thread for {}", id))?;

        Ok(Self {
            id,
            shared,
            join: Some(join),
        })
    }
}

impl FrameSource for LatestFrameSource {
    fn source_id(&self) -> &SourceId {
        &self.id
    }

    fn get_latest_frame(&mut self) -> Result<Option<RawImage>> {
        Ok(self.shared.latest())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
            consecutive_failures: self.shared.consecutive_failures.load(Ordering::Relaxed),
            last_error: self
                .shared
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    fn is_healthy(&self) -> bool {
        self.shared.frames_captured.load(Ordering::Relaxed) > 0
            && self.shared.consecutive_failures.load(Ordering::Relaxed) == 0
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("reader thread for {} panicked", self.id);
            }
        }
    }
}

impl Drop for LatestFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_reader(
    id: SourceId,
    mut backend: Box<dyn StreamBackend>,
    shared: Arc<Shared>,
    reconnect_delay: Duration,
) {
    let mut connected = false;
    let mut ever_connected = false;

    while !shared.stopping() {
        if !connected {
            match backend.connect() {
                Ok(()) => {
                    connected = true;
                    if ever_connected {
                        shared.reconnects.fetch_add(1, Ordering::Relaxed);
                        log::info!("source {} reconnected", id);
                    }
                    ever_connected = true;
                }
                Err(err) => {
                    note_failure(&id, &shared, &err, "connect");
                    backend.release();
                    wait_before_retry(&shared, reconnect_delay);
                    continue;
                }
            }
        }

        match backend.next_frame() {
            Ok(image) => {
                shared.store(Some(image));
                shared.record_frame();
            }
            Err(err) => {
                note_failure(&id, &shared, &err, "read");
                shared.store(None);
                backend.release();
                connected = false;
                wait_before_retry(&shared, reconnect_delay);
            }
        }
    }

    backend.release();
    log::debug!("reader for {} stopped", id);
}

fn note_failure(id: &SourceId, shared: &Shared, err: &anyhow::Error, stage: &str) {
    let streak = shared.record_failure(err);
    if streak == 1 {
        log::warn!("source {} {} failed, reconnecting: {:#}", id, stage, err);
    } else {
        log::debug!("source {} {} failed ({} in a row): {:#}", id, stage, streak, err);
    }
}

/// Sleep for `delay` (at least `MIN_RECONNECT_DELAY`) plus up to 25% jitter,
/// waking early on shutdown.
fn wait_before_retry(shared: &Shared, delay: Duration) {
    let delay = delay.max(MIN_RECONNECT_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
    let deadline = Instant::now() + delay + Duration::from_millis(jitter_ms);
    while !shared.stopping() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticStream;

    fn wait_for_frame(source: &mut LatestFrameSource) -> Option<RawImage> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(frame)) = source.get_latest_frame() {
                return Some(frame);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn publishes_frames_from_background_thread() {
        let backend = Box::new(SyntheticStream::with_fps("stub://bg", 100));
        let mut source =
            LatestFrameSource::spawn(SourceId::new("stub://bg"), backend, Duration::ZERO).unwrap();

        assert!(wait_for_frame(&mut source).is_some());
        assert!(source.stats().frames_captured >= 1);
        assert!(source.is_healthy());

        source.stop();
        source.stop();
    }

    #[derive(Default)]
    struct NeverConnects {
        attempts: Arc<AtomicU64>,
    }

    impl StreamBackend for NeverConnects {
        fn connect(&mut self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("camera offline")
        }
        fn next_frame(&mut self) -> Result<RawImage> {
            anyhow::bail!("not connected")
        }
        fn release(&mut self) {}
        fn describe(&self) -> String {
            "never".to_string()
        }
    }

    #[test]
    fn stop_releases_stream_while_connect_keeps_failing() {
        let mut source = LatestFrameSource::spawn(
            SourceId::new("rtsp://offline"),
            Box::new(NeverConnects::default()),
            Duration::from_millis(10),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert!(source.get_latest_frame().unwrap().is_none());
        assert!(!source.is_healthy());
        let stats = source.stats();
        assert!(stats.consecutive_failures >= 1);
        assert_eq!(stats.last_error.as_deref(), Some("camera offline"));

        source.stop();
    }

    #[test]
    fn zero_delay_still_waits_between_connects() {
        let attempts = Arc::new(AtomicU64::new(0));
        let backend = NeverConnects {
            attempts: attempts.clone(),
        };
        let mut source =
            LatestFrameSource::spawn(SourceId::new("rtsp://offline"), Box::new(backend), Duration::ZERO)
                .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        source.stop();

        // 200ms at a 10ms floor allows ~20 attempts.
        let attempts = attempts.load(Ordering::SeqCst);
        assert!(attempts >= 1);
        assert!(attempts <= 40, "connect attempted {} times", attempts);
    }
}
