//! Synthetic stream backend for `stub://` URLs.
//!
//! Produces small RGB frames at a fixed rate. The scene is static most of the
//! time and changes on every frame during periodic activity bursts, which is
//! enough for the stub detector to open and close detection windows.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::StreamBackend;
use crate::frame::RawImage;

const SYNTHETIC_WIDTH: u32 = 64;
const SYNTHETIC_HEIGHT: u32 = 48;
const SYNTHETIC_FPS: u32 = 10;
/// Frames per scene cycle.
const CYCLE_FRAMES: u64 = 600;
/// Leading frames of each cycle during which the scene moves.
const ACTIVE_FRAMES: u64 = 100;

pub struct SyntheticStream {
    url: String,
    connected: bool,
    frame_count: u64,
    frame_interval: Duration,
    next_due: Option<Instant>,
}

impl SyntheticStream {
    pub fn new(url: &str) -> Self {
        Self::with_fps(url, SYNTHETIC_FPS)
    }

    pub fn with_fps(url: &str, fps: u32) -> Self {
        Self {
            url: url.to_string(),
            connected: false,
            frame_count: 0,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
        }
    }

    /// Unpaced variant for tests.
    pub fn unpaced(url: &str) -> Self {
        Self {
            frame_interval: Duration::ZERO,
            ..Self::new(url)
        }
    }

    fn is_active(frame_count: u64) -> bool {
        frame_count % CYCLE_FRAMES < ACTIVE_FRAMES
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3) as usize;
        let phase = if Self::is_active(self.frame_count) {
            self.frame_count
        } else {
            0
        };
        (0..pixel_count)
            .map(|i| ((i as u64 + phase) % 256) as u8)
            .collect()
    }

    fn pace(&mut self) {
        if self.frame_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.frame_interval);
    }
}

impl StreamBackend for SyntheticStream {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("stream {} opened (synthetic)", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawImage> {
        if !self.connected {
            return Err(anyhow!("stream {} is not connected", self.url));
        }
        self.pace();
        self.frame_count += 1;
        Ok(RawImage::new(
            self.generate_pixels(),
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
        ))
    }

    fn release(&mut self) {
        self.connected = false;
        self.next_due = None;
    }

    fn describe(&self) -> String {
        format!("synthetic:{}", self.url)
    }
}
