use std::collections::BTreeMap;

use crate::frame::{Frame, TrackKey};

/// Earliest and latest sighting of one (track, class) pair.
#[derive(Clone, Debug)]
pub struct SpanEntry {
    pub first_frame: Frame,
    pub last_frame: Frame,
}

/// Keeps, per (track, class), the first and last frame by timestamp,
/// independent of arrival order.
#[derive(Debug, Default)]
pub struct StartAndEndBuffer {
    entries: BTreeMap<TrackKey, SpanEntry>,
}

impl StartAndEndBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, frame: Frame) {
        let timestamp = frame.timestamp();
        for detection in frame.detections() {
            let Some(key) = detection.identity() else {
                continue;
            };

            match self.entries.get_mut(&key) {
                None => {
                    self.entries.insert(
                        key,
                        SpanEntry {
                            first_frame: frame.clone(),
                            last_frame: frame.clone(),
                        },
                    );
                }
                Some(entry) => {
                    if timestamp < entry.first_frame.timestamp() {
                        entry.first_frame = frame.clone();
                    }
                    if timestamp > entry.last_frame.timestamp() {
                        entry.last_frame = frame.clone();
                    }
                }
            }
        }
    }

    /// First and last frame of every pair; a pair seen once yields one frame.
    pub fn get_frames(&self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(self.entries.len() * 2);
        for entry in self.entries.values() {
            frames.push(entry.first_frame.clone());
            if !Frame::same_frame(&entry.first_frame, &entry.last_frame) {
                frames.push(entry.last_frame.clone());
            }
        }
        frames
    }

    pub fn entry(&self, key: TrackKey) -> Option<&SpanEntry> {
        self.entries.get(&key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&TrackKey, &SpanEntry)> {
        self.entries.iter()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
