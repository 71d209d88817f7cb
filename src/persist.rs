//! Clip persistence.
//!
//! A `Persister` turns the retained frames of one detection window into an
//! artifact. `ManifestPersister` writes one directory per clip:
//!
//! ```text
//! <output_dir>/clip-<first frame millis>/
//!     frame-0000.jpg
//!     frame-0001.jpg
//!     manifest.json
//! ```

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::frame::{class_label, Detection, Frame, LabelMap, SourceId};

pub trait Persister: Send {
    /// Persist an ordered frame set. Returns `Ok(None)` for an empty set.
    fn persist(&mut self, frames: &[Frame], labels: Option<&LabelMap>) -> Result<Option<PathBuf>>;
}

/// Persisting a flushed window failed.
///
/// Carries the snapshot so the caller can retry or hand it elsewhere.
#[derive(Debug)]
pub struct PersistError {
    pub frames: Vec<Frame>,
    pub cause: anyhow::Error,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to persist {} frames: {:#}", self.frames.len(), self.cause)
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

// ----------------------------------------------------------------------------
// ManifestPersister
// ----------------------------------------------------------------------------

pub const MANIFEST_FILE: &str = "manifest.json";

/// Writes JPEG frames plus a JSON manifest under `output_dir`.
///
/// A clip that fails partway is removed, so every clip directory on disk
/// has its manifest.
pub struct ManifestPersister {
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct Manifest<'a> {
    frame_count: usize,
    frames: Vec<ManifestFrame<'a>>,
}

#[derive(Serialize)]
struct ManifestFrame<'a> {
    file: String,
    source: &'a SourceId,
    timestamp_ms: u64,
    width: u32,
    height: u32,
    detections: Vec<ManifestDetection<'a>>,
}

#[derive(Serialize)]
struct ManifestDetection<'a> {
    #[serde(flatten)]
    detection: &'a Detection,
    label: Option<String>,
}

impl ManifestPersister {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("create output dir {}", output_dir.display()))?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create a fresh clip directory, suffixing the name on collision.
    fn create_clip_dir(&self, stamp: u64) -> Result<PathBuf> {
        let base = format!("clip-{}", stamp);
        for attempt in 0u32..1000 {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let path = self.output_dir.join(name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(path),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create clip dir {}", path.display()))
                }
            }
        }
        Err(anyhow!("no free clip directory name for {}", base))
    }
}

impl Persister for ManifestPersister {
    fn persist(&mut self, frames: &[Frame], labels: Option<&LabelMap>) -> Result<Option<PathBuf>> {
        let Some(first) = frames.first() else {
            return Ok(None);
        };

        let clip_dir = self.create_clip_dir(first.timestamp_millis() as u64)?;
        if let Err(err) = write_clip(&clip_dir, frames, labels) {
            if let Err(cleanup) = fs::remove_dir_all(&clip_dir) {
                log::warn!("failed to remove partial clip {}: {}", clip_dir.display(), cleanup);
            }
            return Err(err);
        }

        log::info!("persisted {} frames to {}", frames.len(), clip_dir.display());
        Ok(Some(clip_dir))
    }
}

fn write_clip(clip_dir: &Path, frames: &[Frame], labels: Option<&LabelMap>) -> Result<()> {
    let mut entries = Vec::with_capacity(frames.len());

    for (index, frame) in frames.iter().enumerate() {
        let file = format!("frame-{:04}.jpg", index);
        write_jpeg(&clip_dir.join(&file), frame)?;

        entries.push(ManifestFrame {
            file,
            source: frame.source(),
            timestamp_ms: frame.timestamp_millis() as u64,
            width: frame.image().width,
            height: frame.image().height,
            detections: frame
                .detections()
                .iter()
                .map(|detection| ManifestDetection {
                    detection,
                    label: detection
                        .class_id
                        .map(|id| class_label(labels, Some(id))),
                })
                .collect(),
        });
    }

    let manifest = Manifest {
        frame_count: entries.len(),
        frames: entries,
    };
    let manifest_path = clip_dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(&manifest)?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("write {}", manifest_path.display()))?;
    Ok(())
}

fn write_jpeg(path: &Path, frame: &Frame) -> Result<()> {
    let image = frame.image();
    let buffer = image::RgbImage::from_raw(image.width, image.height, image.pixels().to_vec())
        .ok_or_else(|| {
            anyhow!(
                "frame buffer of {} bytes does not match {}x{} rgb",
                image.byte_len(),
                image.width,
                image.height
            )
        })?;
    buffer
        .save_with_format(path, image::ImageFormat::Jpeg)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
