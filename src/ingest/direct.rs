//! Synchronous frame source with a bounded reconnect budget.

use anyhow::Result;

use super::{ConnectionError, FrameSource, SourceStats, StreamBackend};
use crate::frame::{RawImage, SourceId};

/// Reads one frame per pull on the caller's thread.
///
/// A failed read releases the stream and reconnects. After `max_retries`
/// reconnects in a row fail, the pull returns a `ConnectionError`; the next
/// pull starts a fresh budget.
pub struct DirectSource {
    id: SourceId,
    backend: Box<dyn StreamBackend>,
    max_retries: u32,
    connected: bool,
    stopped: bool,
    stats: SourceStats,
}

impl DirectSource {
    pub fn new(id: SourceId, backend: Box<dyn StreamBackend>, max_retries: u32) -> Self {
        Self {
            id,
            backend,
            max_retries,
            connected: false,
            stopped: false,
            stats: SourceStats::default(),
        }
    }

    fn attempt(&mut self) -> Result<RawImage> {
        if !self.connected {
            self.backend.connect()?;
            if self.stats.frames_captured > 0 || self.stats.consecutive_failures > 0 {
                self.stats.reconnects += 1;
            }
            self.connected = true;
        }
        self.backend.next_frame()
    }
}

impl FrameSource for DirectSource {
    fn source_id(&self) -> &SourceId {
        &self.id
    }

    fn get_latest_frame(&mut self) -> Result<Option<RawImage>> {
        if self.stopped {
            return Ok(None);
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.attempt() {
                Ok(image) => {
                    self.stats.frames_captured += 1;
                    self.stats.consecutive_failures = 0;
                    return Ok(Some(image));
                }
                Err(err) => {
                    self.backend.release();
                    self.connected = false;
                    self.stats.consecutive_failures += 1;
                    self.stats.last_error = Some(format!("{:#}", err));
                    log::debug!("source {} attempt {} failed: {:#}", self.id, attempts, err);

                    if attempts > self.max_retries {
                        return Err(ConnectionError {
                            source: self.id.clone(),
                            attempts,
                            last_error: format!("{:#}", err),
                        }
                        .into());
                    }
                }
            }
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    fn is_healthy(&self) -> bool {
        !self.stopped && self.stats.consecutive_failures == 0
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.backend.release();
            self.connected = false;
            self.stopped = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` reads, then succeeds.
    struct FlakyStream {
        failures: u32,
        reads: Arc<AtomicU32>,
        connects: Arc<AtomicU32>,
    }

    impl StreamBackend for FlakyStream {
        fn connect(&mut self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn next_frame(&mut self) -> Result<RawImage> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("decode error {}", n);
            }
            Ok(RawImage::new(vec![1, 2, 3], 1, 1))
        }

        fn release(&mut self) {}

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn flaky(failures: u32, max_retries: u32) -> (DirectSource, Arc<AtomicU32>) {
        let connects = Arc::new(AtomicU32::new(0));
        let backend = FlakyStream {
            failures,
            reads: Arc::new(AtomicU32::new(0)),
            connects: connects.clone(),
        };
        (
            DirectSource::new(SourceId::new("clip.mp4"), Box::new(backend), max_retries),
            connects,
        )
    }

    #[test]
    fn recovers_within_budget() {
        let (mut source, connects) = flaky(2, 3);
        let frame = source.get_latest_frame().unwrap();
        assert!(frame.is_some());
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        let stats = source.stats();
        assert_eq!(stats.frames_captured, 1);
        assert_eq!(stats.reconnects, 2);
        assert!(source.is_healthy());
    }

    #[test]
    fn fails_after_budget() {
        let (mut source, _) = flaky(10, 2);
        let err = source.get_latest_frame().unwrap_err();
        let conn = err.downcast_ref::<ConnectionError>().expect("connection error");
        assert_eq!(conn.attempts, 3);
        assert_eq!(conn.last_error, "decode error 2");
        assert!(!source.is_healthy());
    }

    #[test]
    fn stopped_source_yields_nothing() {
        let (mut source, _) = flaky(0, 0);
        assert!(source.get_latest_frame().unwrap().is_some());
        source.stop();
        assert!(source.get_latest_frame().unwrap().is_none());
    }
}
