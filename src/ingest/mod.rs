//! Frame ingestion sources.
//!
//! A `StreamBackend` knows how to open one stream and decode its next frame:
//! - `stub://` URLs: synthetic frames (tests, demo)
//! - file paths and network URLs: FFmpeg (feature: ingest-ffmpeg)
//!
//! A `FrameSource` wraps a backend and exposes the latest decoded frame to the
//! orchestrator:
//! - `LatestFrameSource`: background thread, unbounded silent reconnects,
//!   last-value slot. The consumer never blocks and never sees an error.
//! - `DirectSource`: reads synchronously on each pull, reconnects a bounded
//!   number of times, then fails with `ConnectionError`. Meant for local files
//!   where reconnect cost does not matter.

mod direct;
#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
mod latest;
mod synthetic;

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::frame::{RawImage, SourceId};

pub use direct::DirectSource;
#[cfg(feature = "ingest-ffmpeg")]
pub use ffmpeg::FfmpegStream;
pub use latest::LatestFrameSource;
pub use synthetic::SyntheticStream;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

/// Decoder for one stream.
pub trait StreamBackend: Send {
    /// Open (or reopen) the underlying stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is decoded.
    fn next_frame(&mut self) -> Result<RawImage>;

    /// Release the stream handle. `connect` must be called before reading again.
    fn release(&mut self);

    fn describe(&self) -> String;
}

/// A stream as seen by the orchestrator.
pub trait FrameSource: Send {
    fn source_id(&self) -> &SourceId;

    /// Most recent decoded frame, `None` when no frame is available yet.
    fn get_latest_frame(&mut self) -> Result<Option<RawImage>>;

    fn stats(&self) -> SourceStats;

    fn is_healthy(&self) -> bool;

    /// Stop ingestion and release the stream. Idempotent.
    fn stop(&mut self);
}

/// Counters for one source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub reconnects: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
}

/// How a source reacts to stream failures.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Background reader with unbounded reconnects.
    #[default]
    Resilient,
    /// Synchronous reads with a bounded reconnect budget.
    Direct,
}

/// Configuration for one source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// File path, network URL, or `stub://name`.
    pub url: String,
    pub mode: SourceMode,
    /// Reconnect budget per pull (direct mode only).
    pub max_retries: u32,
    /// Pause between reconnect attempts (resilient mode only).
    pub reconnect_delay: Duration,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: SourceMode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

/// Pick a stream backend for a connection string.
pub fn open_backend(url: &str) -> Result<Box<dyn StreamBackend>> {
    if url.trim().is_empty() {
        return Err(anyhow!("source url must not be empty"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticStream::new(url)));
    }
    #[cfg(feature = "ingest-ffmpeg")]
    {
        Ok(Box::new(FfmpegStream::new(url)?))
    }
    #[cfg(not(feature = "ingest-ffmpeg"))]
    {
        Err(anyhow!(
            "source '{}' requires the ingest-ffmpeg feature",
            url
        ))
    }
}

/// Build a frame source from configuration, starting its reader when resilient.
pub fn build_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let backend = open_backend(&config.url)?;
    let id = SourceId::new(config.url.clone());
    match config.mode {
        SourceMode::Resilient => Ok(Box::new(LatestFrameSource::spawn(
            id,
            backend,
            config.reconnect_delay,
        )?)),
        SourceMode::Direct => Ok(Box::new(DirectSource::new(id, backend, config.max_retries))),
    }
}

/// A direct source exhausted its reconnect budget.
#[derive(Debug)]
pub struct ConnectionError {
    pub source: SourceId,
    pub attempts: u32,
    pub last_error: String,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source {} unavailable after {} attempts: {}",
            self.source, self.attempts, self.last_error
        )
    }
}

impl std::error::Error for ConnectionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_use_synthetic_backend() {
        let backend = open_backend("stub://front").unwrap();
        assert_eq!(backend.describe(), "synthetic:stub://front");
        assert!(open_backend("  ").is_err());
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    #[test]
    fn real_urls_need_ffmpeg() {
        let err = match open_backend("rtsp://camera/stream") {
            Ok(_) => panic!("rtsp backend opened without ffmpeg"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("ingest-ffmpeg"));
    }

    #[test]
    fn source_mode_parses_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: SourceMode,
        }
        let parsed: Wrapper = toml::from_str(r#"mode = "direct""#).unwrap();
        assert_eq!(parsed.mode, SourceMode::Direct);
    }

    #[test]
    fn connection_error_names_source() {
        let err = ConnectionError {
            source: SourceId::new("clip.mp4"),
            attempts: 4,
            last_error: "eof".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "source clip.mp4 unavailable after 4 attempts: eof"
        );
    }
}
