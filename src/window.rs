//! Detection window state machine.
//!
//! ```text
//!            frame with detections
//!   Idle ───────────────────────────▶ Active ──┐ frame with detections:
//!    ▲                                  │   ◀──┘ last_detection_at = now
//!    └──────────── flush ───────────────┘
//! ```
//!
//! A window opens on the first frame that carries a detection and flushes
//! when no detection has been seen for `inactivity_gap`, or when it has been
//! open for `max_duration`. Flushing hands the retained frames to the
//! persister and the `on_window_end` callbacks, then resets the policy.
//! Frames without detections never open a window and are never retained.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};

use crate::callback::{CallbackSet, WindowCallback};
use crate::clock::elapsed_between;
use crate::frame::{Frame, LabelMap};
use crate::persist::{PersistError, Persister};
use crate::retention::RetentionPolicy;

pub const DEFAULT_INACTIVITY_GAP: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WINDOW_DURATION: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSettings {
    pub inactivity_gap: Duration,
    pub max_duration: Duration,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            inactivity_gap: DEFAULT_INACTIVITY_GAP,
            max_duration: DEFAULT_MAX_WINDOW_DURATION,
        }
    }
}

impl WindowSettings {
    pub fn validate(&self) -> Result<()> {
        if self.inactivity_gap.is_zero() {
            return Err(anyhow!("inactivity gap must be greater than zero"));
        }
        if self.max_duration.is_zero() {
            return Err(anyhow!("max window duration must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowState {
    Idle,
    Active {
        started_at: SystemTime,
        last_detection_at: SystemTime,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// No detection for the inactivity gap.
    Inactivity,
    /// Window reached its maximum duration.
    MaxDuration,
    /// Flushed because the pipeline is stopping.
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inactivity => "inactivity",
            Self::MaxDuration => "max duration",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Outcome of one flush.
#[derive(Clone, Debug)]
pub struct FlushReport {
    pub reason: FlushReason,
    pub started_at: SystemTime,
    pub last_detection_at: SystemTime,
    pub frames: usize,
    pub artifact: Option<PathBuf>,
    pub callback_failures: usize,
}

pub struct DetectionWindow {
    settings: WindowSettings,
    policy: RetentionPolicy,
    callbacks: CallbackSet,
    persister: Option<Box<dyn Persister>>,
    labels: Option<LabelMap>,
    state: WindowState,
}

impl DetectionWindow {
    pub fn new(settings: WindowSettings, policy: RetentionPolicy) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            policy,
            callbacks: CallbackSet::new(),
            persister: None,
            labels: None,
            state: WindowState::Idle,
        })
    }

    pub fn with_persister(mut self, persister: Box<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn WindowCallback>) {
        self.callbacks.push(callback);
    }

    pub fn settings(&self) -> WindowSettings {
        self.settings
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn labels(&self) -> Option<&LabelMap> {
        self.labels.as_ref()
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, WindowState::Active { .. })
    }

    pub fn retained_len(&self) -> usize {
        self.policy.len()
    }

    /// Feed one annotated frame observed at `now`.
    ///
    /// Returns false when the frame carried no detections and was dropped.
    pub fn observe(&mut self, frame: Frame, now: SystemTime) -> bool {
        if !frame.has_detections() {
            return false;
        }

        self.state = match self.state {
            WindowState::Idle => {
                log::info!(
                    "detection window opened by {} (policy {})",
                    frame.source(),
                    self.policy.name()
                );
                self.callbacks.window_start(&frame);
                WindowState::Active {
                    started_at: now,
                    last_detection_at: now,
                }
            }
            WindowState::Active { started_at, .. } => WindowState::Active {
                started_at,
                last_detection_at: now,
            },
        };

        self.policy.add_frame(frame.clone());
        self.callbacks.frame(&frame);
        true
    }

    /// Why the window should be flushed at `now`, if it should.
    pub fn flush_reason(&self, now: SystemTime) -> Option<FlushReason> {
        let WindowState::Active {
            started_at,
            last_detection_at,
        } = self.state
        else {
            return None;
        };

        if elapsed_between(last_detection_at, now) >= self.settings.inactivity_gap {
            Some(FlushReason::Inactivity)
        } else if elapsed_between(started_at, now) >= self.settings.max_duration {
            Some(FlushReason::MaxDuration)
        } else {
            None
        }
    }

    pub fn should_flush(&self, now: SystemTime) -> bool {
        self.flush_reason(now).is_some()
    }

    /// Flush if a boundary has been reached at `now`.
    pub fn poll_flush(&mut self, now: SystemTime) -> Result<Option<FlushReport>> {
        match self.flush_reason(now) {
            Some(reason) => self.flush(reason),
            None => Ok(None),
        }
    }

    /// Close the window: persist the retained frames, fire `on_window_end`,
    /// reset the policy and return to Idle. Does nothing while Idle.
    ///
    /// A persister failure surfaces as `PersistError` after the window is
    /// back to Idle.
    pub fn flush(&mut self, reason: FlushReason) -> Result<Option<FlushReport>> {
        let WindowState::Active {
            started_at,
            last_detection_at,
        } = self.state
        else {
            return Ok(None);
        };

        let frames = self.policy.get_frames();
        let persisted = match self.persister.as_mut() {
            Some(persister) => persister.persist(&frames, self.labels.as_ref()),
            None => Ok(None),
        };
        let callback_failures = self.callbacks.window_end(&frames);

        self.policy.reset();
        self.state = WindowState::Idle;

        log::info!(
            "detection window flushed ({}): {} frames retained over {:?}",
            reason,
            frames.len(),
            elapsed_between(started_at, last_detection_at)
        );

        match persisted {
            Ok(artifact) => Ok(Some(FlushReport {
                reason,
                started_at,
                last_detection_at,
                frames: frames.len(),
                artifact,
                callback_failures,
            })),
            Err(cause) => Err(PersistError { frames, cause }.into()),
        }
    }

    /// Flush an open window and wait for background callbacks.
    pub fn finish(&mut self) -> Result<Option<FlushReport>> {
        let flushed = self.flush(FlushReason::Shutdown);
        self.callbacks.drain();
        flushed
    }
}
