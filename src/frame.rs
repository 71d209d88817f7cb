//! Frame data model.
//!
//! - `RawImage`: decoded pixels as produced by a frame source. Cheap to clone,
//!   never mutated after capture.
//! - `Detection`: one detector output (box, confidence, class id, track id).
//! - `Frame`: a raw image together with its detections, timestamp and source.
//!
//! Frames are shared behind an `Arc`, so every hand-off (policy, callback,
//! persister) is an owned snapshot that later resets cannot touch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

// ----------------------------------------------------------------------------
// SourceId
// ----------------------------------------------------------------------------

/// Identifier of the stream a frame came from (usually its connection string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Class id to human-readable label.
pub type LabelMap = BTreeMap<u32, String>;

/// Label for a class id, falling back to the numeric id.
pub fn class_label(labels: Option<&LabelMap>, class_id: Option<u32>) -> String {
    match (labels, class_id) {
        (Some(labels), Some(id)) => labels.get(&id).cloned().unwrap_or_else(|| id.to_string()),
        (None, Some(id)) => id.to_string(),
        (_, None) => "unknown".to_string(),
    }
}

// ----------------------------------------------------------------------------
// RawImage
// ----------------------------------------------------------------------------

/// Decoded RGB24 image.
///
/// Pixel data lives behind an `Arc<[u8]>`: cloning hands out another reference
/// to the same immutable buffer, never a view into memory a decoder may reuse.
#[derive(Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    data: Arc<[u8]>,
    captured_at: SystemTime,
}

impl RawImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::captured_at(data, width, height, SystemTime::now())
    }

    pub fn captured_at(data: Vec<u8>, width: u32, height: u32, captured_at: SystemTime) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            captured_at,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn capture_time(&self) -> SystemTime {
        self.captured_at
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pixel content is never logged.
        f.debug_struct("RawImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Detection
// ----------------------------------------------------------------------------

/// Axis-aligned box in pixel coordinates (x1, y1, x2, y2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }
}

/// One detector output.
///
/// `confidence`, `class_id` and `track_id` are optional because upstream
/// trackers leave them unset for unconfirmed objects. Identity-based retention
/// policies skip detections that lack the fields they key on.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: Option<f32>,
    pub class_id: Option<u32>,
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_id: u32, track_id: Option<u32>) -> Self {
        Self {
            bbox,
            confidence: Some(confidence),
            class_id: Some(class_id),
            track_id,
        }
    }

    /// `(track_id, class_id)` when both are present.
    pub fn identity(&self) -> Option<TrackKey> {
        Some(TrackKey {
            track_id: self.track_id?,
            class_id: self.class_id?,
        })
    }
}

/// Key of one tracked object under one class label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackKey {
    pub track_id: u32,
    pub class_id: u32,
}

impl TrackKey {
    pub fn new(track_id: u32, class_id: u32) -> Self {
        Self { track_id, class_id }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

struct FrameInner {
    image: RawImage,
    detections: Vec<Detection>,
    timestamp: SystemTime,
    source: SourceId,
}

/// Annotated frame: image plus detections, stamped with time and source.
///
/// Immutable after construction. Clones share the same allocation.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    pub fn new(
        image: RawImage,
        detections: Vec<Detection>,
        timestamp: SystemTime,
        source: SourceId,
    ) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                image,
                detections,
                timestamp,
                source,
            }),
        }
    }

    pub fn image(&self) -> &RawImage {
        &self.inner.image
    }

    pub fn detections(&self) -> &[Detection] {
        &self.inner.detections
    }

    pub fn has_detections(&self) -> bool {
        !self.inner.detections.is_empty()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.inner.timestamp
    }

    /// Milliseconds since the Unix epoch (0 for pre-epoch clocks).
    pub fn timestamp_millis(&self) -> u128 {
        self.inner
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    pub fn source(&self) -> &SourceId {
        &self.inner.source
    }

    /// Highest confidence any detection of `key` reaches in this frame, 0 if absent.
    pub fn max_confidence_for(&self, key: TrackKey) -> f32 {
        self.detections()
            .iter()
            .filter(|d| d.identity() == Some(key))
            .filter_map(|d| d.confidence)
            .fold(0.0, f32::max)
    }

    /// True when both handles point at the same frame.
    pub fn same_frame(a: &Frame, b: &Frame) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("source", &self.inner.source)
            .field("timestamp_ms", &self.timestamp_millis())
            .field("detections", &self.inner.detections.len())
            .field("image", &self.inner.image)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
