use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::frame::{Frame, TrackKey};

/// Best frame seen for one (track, class) pair and the span the pair was observed.
#[derive(Clone, Debug)]
pub struct AccurateEntry {
    pub frame: Frame,
    pub window_start_time: SystemTime,
    pub window_end_time: SystemTime,
}

/// Keeps, per (track, class), the frame in which that object was detected with
/// the highest confidence.
///
/// The observed span always widens to cover every sighting; the representative
/// frame changes only on a strictly higher confidence.
#[derive(Debug, Default)]
pub struct MostAccurateFrameBuffer {
    entries: BTreeMap<TrackKey, AccurateEntry>,
}

impl MostAccurateFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, frame: Frame) {
        let timestamp = frame.timestamp();
        for detection in frame.detections() {
            let (Some(key), Some(confidence)) = (detection.identity(), detection.confidence)
            else {
                continue;
            };

            match self.entries.get_mut(&key) {
                None => {
                    self.entries.insert(
                        key,
                        AccurateEntry {
                            frame: frame.clone(),
                            window_start_time: timestamp,
                            window_end_time: timestamp,
                        },
                    );
                }
                Some(entry) => {
                    if confidence > entry.frame.max_confidence_for(key) {
                        entry.frame = frame.clone();
                    }
                    entry.window_start_time = entry.window_start_time.min(timestamp);
                    entry.window_end_time = entry.window_end_time.max(timestamp);
                }
            }
        }
    }

    pub fn get_frames(&self) -> Vec<Frame> {
        self.entries.values().map(|entry| entry.frame.clone()).collect()
    }

    pub fn entry(&self, key: TrackKey) -> Option<&AccurateEntry> {
        self.entries.get(&key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&TrackKey, &AccurateEntry)> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BoundingBox, Detection};
    use crate::retention::test_support::{at, frame, tracked};

    #[test]
    fn keeps_highest_confidence_and_full_span() {
        let mut buffer = MostAccurateFrameBuffer::new();
        buffer.add_frame(frame(0, vec![tracked(1, 2, 0.4)]));
        buffer.add_frame(frame(1, vec![tracked(1, 2, 0.9)]));
        buffer.add_frame(frame(2, vec![tracked(1, 2, 0.3)]));

        let entry = buffer.entry(TrackKey::new(1, 2)).unwrap();
        assert_eq!(entry.frame.timestamp(), at(1));
        assert_eq!(entry.window_start_time, at(0));
        assert_eq!(entry.window_end_time, at(2));
        assert_eq!(buffer.get_frames().len(), 1);
    }

    #[test]
    fn equal_confidence_does_not_replace() {
        let mut buffer = MostAccurateFrameBuffer::new();
        buffer.add_frame(frame(0, vec![tracked(1, 2, 0.5)]));
        buffer.add_frame(frame(1, vec![tracked(1, 2, 0.5)]));
        let entry = buffer.entry(TrackKey::new(1, 2)).unwrap();
        assert_eq!(entry.frame.timestamp(), at(0));
        assert_eq!(entry.window_end_time, at(1));
    }

    #[test]
    fn out_of_order_timestamps_widen_span() {
        let mut buffer = MostAccurateFrameBuffer::new();
        buffer.add_frame(frame(5, vec![tracked(1, 2, 0.5)]));
        buffer.add_frame(frame(3, vec![tracked(1, 2, 0.1)]));
        let entry = buffer.entry(TrackKey::new(1, 2)).unwrap();
        assert_eq!(entry.window_start_time, at(3));
        assert_eq!(entry.window_end_time, at(5));
        assert_eq!(entry.frame.timestamp(), at(5));
    }

    #[test]
    fn tracks_every_pair_in_a_frame() {
        let mut buffer = MostAccurateFrameBuffer::new();
        buffer.add_frame(frame(0, vec![tracked(1, 2, 0.4), tracked(7, 3, 0.8)]));
        buffer.add_frame(frame(1, vec![tracked(1, 2, 0.6), tracked(7, 3, 0.2)]));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.entry(TrackKey::new(1, 2)).unwrap().frame.timestamp(), at(1));
        assert_eq!(buffer.entry(TrackKey::new(7, 3)).unwrap().frame.timestamp(), at(0));
    }

    #[test]
    fn ignores_detections_without_identity() {
        let mut buffer = MostAccurateFrameBuffer::new();
        buffer.add_frame(frame(0, vec![]));
        buffer.add_frame(frame(1, vec![Detection::new(BoundingBox::default(), 0.9, 1, None)]));
        buffer.add_frame(frame(
            2,
            vec![Detection {
                confidence: None,
                ..tracked(1, 1, 0.0)
            }],
        ));
        assert!(buffer.is_empty());
        assert!(buffer.get_frames().is_empty());
    }
}
