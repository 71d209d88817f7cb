//! Window lifecycle callbacks.
//!
//! Callbacks run on the orchestrator's thread by default. Every invocation is
//! isolated: an error or a panic in one callback is logged and does not stop
//! dispatch to the others, nor the policy reset that follows a flush.
//!
//! `BackgroundCallback` moves a slow consumer off the orchestrator thread.
//! Each invocation gets its own owned snapshot and runs on a fresh thread;
//! the handles are tracked and joined by `drain`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::frame::{class_label, Frame, LabelMap};

pub trait WindowCallback: Send {
    fn name(&self) -> &str {
        "callback"
    }

    /// A detection window opened; `frame` is the frame that opened it.
    fn on_window_start(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    /// A detection-bearing frame arrived while the window is open.
    fn on_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    /// The window was flushed with this retained set.
    fn on_window_end(&mut self, _frames: &[Frame]) -> Result<()> {
        Ok(())
    }

    /// Wait for outstanding work. Called once on shutdown.
    fn drain(&mut self) {}
}

// ----------------------------------------------------------------------------
// CallbackSet
// ----------------------------------------------------------------------------

/// Ordered set of callbacks with per-invocation isolation.
#[derive(Default)]
pub struct CallbackSet {
    callbacks: Vec<Box<dyn WindowCallback>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Box<dyn WindowCallback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Returns the number of callbacks that failed.
    pub fn window_start(&mut self, frame: &Frame) -> usize {
        self.dispatch("window_start", |callback| callback.on_window_start(frame))
    }

    pub fn frame(&mut self, frame: &Frame) -> usize {
        self.dispatch("frame", |callback| callback.on_frame(frame))
    }

    pub fn window_end(&mut self, frames: &[Frame]) -> usize {
        self.dispatch("window_end", |callback| callback.on_window_end(frames))
    }

    pub fn drain(&mut self) {
        for callback in &mut self.callbacks {
            let name = callback.name().to_string();
            if catch_unwind(AssertUnwindSafe(|| callback.drain())).is_err() {
                log::warn!("callback {} panicked while draining", name);
            }
        }
    }

    fn dispatch<F>(&mut self, event: &str, mut invoke: F) -> usize
    where
        F: FnMut(&mut dyn WindowCallback) -> Result<()>,
    {
        let mut failures = 0;
        for callback in &mut self.callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| invoke(callback.as_mut())));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    log::warn!("callback {} failed on {}: {:#}", callback.name(), event, err);
                }
                Err(_) => {
                    failures += 1;
                    log::warn!("callback {} panicked on {}", callback.name(), event);
                }
            }
        }
        failures
    }
}

// ----------------------------------------------------------------------------
// BackgroundCallback
// ----------------------------------------------------------------------------

/// Runs a callback on background threads, one per invocation.
///
/// Invocations may complete out of order. The wrapped callback is behind a
/// mutex, so they never overlap.
pub struct BackgroundCallback<C> {
    name: String,
    inner: Arc<Mutex<C>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: WindowCallback + 'static> BackgroundCallback<C> {
    pub fn new(callback: C) -> Self {
        Self {
            name: format!("background:{}", callback.name()),
            inner: Arc::new(Mutex::new(callback)),
            tasks: Vec::new(),
        }
    }

    /// Invocations spawned and not yet joined.
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    fn spawn<F>(&mut self, event: &'static str, job: F) -> Result<()>
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        self.tasks.retain(|task| !task.is_finished());

        let inner = self.inner.clone();
        let name = self.name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}:{}", self.name, event))
            .spawn(move || {
                let mut callback = inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(err) = job(&mut *callback) {
                    log::warn!("callback {} failed on {}: {:#}", name, event, err);
                }
            })
            .with_context(|| format!("spawn {} thread", self.name))?;
        self.tasks.push(handle);
        Ok(())
    }
}

impl<C: WindowCallback + 'static> WindowCallback for BackgroundCallback<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_window_start(&mut self, frame: &Frame) -> Result<()> {
        let frame = frame.clone();
        self.spawn("window_start", move |callback| callback.on_window_start(&frame))
    }

    fn on_frame(&mut self, frame: &Frame) -> Result<()> {
        let frame = frame.clone();
        self.spawn("frame", move |callback| callback.on_frame(&frame))
    }

    fn on_window_end(&mut self, frames: &[Frame]) -> Result<()> {
        let frames = frames.to_vec();
        self.spawn("window_end", move |callback| callback.on_window_end(&frames))
    }

    fn drain(&mut self) {
        for task in self.tasks.drain(..) {
            if task.join().is_err() {
                log::warn!("callback {} panicked in background", self.name);
            }
        }
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).drain();
    }
}

// ----------------------------------------------------------------------------
// LogCallback
// ----------------------------------------------------------------------------

/// Logs window lifecycle and per-frame detections.
#[derive(Default)]
pub struct LogCallback {
    labels: Option<LabelMap>,
}

impl LogCallback {
    pub fn new(labels: Option<LabelMap>) -> Self {
        Self { labels }
    }
}

impl WindowCallback for LogCallback {
    fn name(&self) -> &str {
        "log"
    }

    fn on_window_start(&mut self, frame: &Frame) -> Result<()> {
        log::info!(
            "detection window opened by {} ({} detections)",
            frame.source(),
            frame.detections().len()
        );
        Ok(())
    }

    fn on_frame(&mut self, frame: &Frame) -> Result<()> {
        for detection in frame.detections() {
            log::trace!(
                "{} track={} class={} conf={:.2}",
                frame.source(),
                detection
                    .track_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
                class_label(self.labels.as_ref(), detection.class_id),
                detection.confidence.unwrap_or(0.0)
            );
        }
        Ok(())
    }

    fn on_window_end(&mut self, frames: &[Frame]) -> Result<()> {
        log::info!("detection window closed with {} retained frames", frames.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::test_support::{frame, tracked};

    #[derive(Default)]
    struct Counts {
        starts: usize,
        frames: usize,
        ends: Vec<usize>,
        drained: bool,
    }

    struct Recording(Arc<Mutex<Counts>>);

    impl WindowCallback for Recording {
        fn on_window_start(&mut self, _frame: &Frame) -> Result<()> {
            self.0.lock().unwrap().starts += 1;
            Ok(())
        }
        fn on_frame(&mut self, _frame: &Frame) -> Result<()> {
            self.0.lock().unwrap().frames += 1;
            Ok(())
        }
        fn on_window_end(&mut self, frames: &[Frame]) -> Result<()> {
            self.0.lock().unwrap().ends.push(frames.len());
            Ok(())
        }
        fn drain(&mut self) {
            self.0.lock().unwrap().drained = true;
        }
    }

    struct Failing;

    impl WindowCallback for Failing {
        fn on_window_start(&mut self, _frame: &Frame) -> Result<()> {
            anyhow::bail!("disk full")
        }
        fn on_window_end(&mut self, _frames: &[Frame]) -> Result<()> {
            panic!("callback bug")
        }
    }

    #[test]
    fn failing_callback_does_not_block_others() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut set = CallbackSet::new();
        set.push(Box::new(Failing));
        set.push(Box::new(Recording(counts.clone())));

        let f = frame(0, vec![tracked(1, 1, 0.5)]);
        assert_eq!(set.window_start(&f), 1);
        assert_eq!(set.frame(&f), 0);
        assert_eq!(set.window_end(&[f.clone(), f]), 1);

        let counts = counts.lock().unwrap();
        assert_eq!(counts.starts, 1);
        assert_eq!(counts.frames, 1);
        assert_eq!(counts.ends, vec![2]);
    }

    #[test]
    fn background_callback_joins_on_drain() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut callback = BackgroundCallback::new(Recording(counts.clone()));
        assert_eq!(callback.name(), "background:callback");

        let f = frame(0, vec![tracked(1, 1, 0.5)]);
        callback.on_window_start(&f).unwrap();
        callback.on_frame(&f).unwrap();
        callback.on_window_end(&[f]).unwrap();
        callback.drain();

        assert_eq!(callback.pending(), 0);
        let counts = counts.lock().unwrap();
        assert_eq!(counts.starts, 1);
        assert_eq!(counts.frames, 1);
        assert_eq!(counts.ends, vec![1]);
        assert!(counts.drained);
    }

    #[test]
    fn background_snapshot_outlives_caller_buffer() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut callback = BackgroundCallback::new(Recording(counts.clone()));
        {
            let mut frames = vec![frame(0, vec![]), frame(1, vec![])];
            callback.on_window_end(&frames).unwrap();
            frames.clear();
        }
        callback.drain();
        assert_eq!(counts.lock().unwrap().ends, vec![2]);
    }
}
