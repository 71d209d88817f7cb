//! Clip saver
//!
//! Watches one or more video streams, runs an object detector over the newest
//! frame of each, and groups detection-bearing frames into activity windows.
//! When activity stops (or a window runs too long) the frames kept by the
//! configured retention policy are persisted and handed to callbacks.
//!
//! # Module Structure
//!
//! - `frame`: Frame data model (RawImage, Detection, Frame)
//! - `ingest`: Stream backends and frame sources (resilient and direct)
//! - `detect`: Detector trait, stub backend, registry, detection filters
//! - `retention`: Frame retention policies
//! - `window`: Detection window state machine
//! - `callback`: Window lifecycle callbacks
//! - `persist`: Clip persistence
//! - `orchestrator`: Polling loop
//! - `clock`, `config`: Time source and configuration

pub mod callback;
pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod persist;
pub mod retention;
pub mod window;

pub use callback::{BackgroundCallback, CallbackSet, LogCallback, WindowCallback};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClipSaverConfig;
pub use detect::{
    BackendRegistry, DetectionCapability, DetectionFilter, DetectorBackend, FilterChain,
    StubBackend,
};
pub use frame::{BoundingBox, Detection, Frame, LabelMap, RawImage, SourceId, TrackKey};
pub use ingest::{
    build_source, ConnectionError, DirectSource, FrameSource, LatestFrameSource, SourceConfig,
    SourceMode, SourceStats, StreamBackend, SyntheticStream,
};
pub use orchestrator::{Orchestrator, TickReport};
pub use persist::{ManifestPersister, PersistError, Persister};
pub use retention::{RetentionConfig, RetentionPolicy};
pub use window::{DetectionWindow, FlushReason, FlushReport, WindowSettings, WindowState};
