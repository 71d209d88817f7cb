use std::collections::HashSet;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::frame::{BoundingBox, Detection, RawImage, SourceId};

const STUB_CONFIDENCE: f32 = 0.85;
const STUB_CLASS_ID: u32 = 0;

/// Stub backend for testing. Reports a full-frame detection whenever a frame's
/// pixels differ from every frame of the previous batch.
///
/// Through `detect_sources` the track id is derived from the source id, so
/// each stream keeps one track however the batch is composed. Plain `detect`
/// has no stream identity and numbers frames by batch position instead.
#[derive(Default)]
pub struct StubBackend {
    previous: HashSet<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn run<F>(&mut self, batch: &[RawImage], track_id: F) -> Vec<Vec<Detection>>
    where
        F: Fn(usize) -> u32,
    {
        let hashes: Vec<[u8; 32]> = batch
            .iter()
            .map(|image| Sha256::digest(image.pixels()).into())
            .collect();

        let results = batch
            .iter()
            .zip(&hashes)
            .enumerate()
            .map(|(index, (image, hash))| {
                let motion = !self.previous.is_empty() && !self.previous.contains(hash);
                if motion {
                    vec![Detection::new(
                        BoundingBox::full(image.width, image.height),
                        STUB_CONFIDENCE,
                        STUB_CLASS_ID,
                        Some(track_id(index)),
                    )]
                } else {
                    Vec::new()
                }
            })
            .collect();

        self.previous = hashes.into_iter().collect();
        results
    }
}

/// Stable track id for a stream.
fn source_track_id(source: &SourceId) -> u32 {
    let digest = Sha256::digest(source.as_str().as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::Motion | DetectionCapability::Tracking
        )
    }

    fn detect(&mut self, batch: &[RawImage]) -> Result<Vec<Vec<Detection>>> {
        Ok(self.run(batch, |index| index as u32 + 1))
    }

    fn detect_sources(
        &mut self,
        sources: &[SourceId],
        batch: &[RawImage],
    ) -> Result<Vec<Vec<Detection>>> {
        if sources.len() != batch.len() {
            return Err(anyhow!(
                "stub detector got {} source ids for {} frames",
                sources.len(),
                batch.len()
            ));
        }
        Ok(self.run(batch, |index| source_track_id(&sources[index])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(bytes: &[u8]) -> RawImage {
        RawImage::new(bytes.to_vec(), 1, 1)
    }

    #[test]
    fn stub_backend_detects_change() {
        let mut backend = StubBackend::new();

        // First batch: nothing to compare against.
        let r1 = backend.detect(&[image(b"frame1")]).unwrap();
        assert!(r1[0].is_empty());

        // Different content: one detection.
        let r2 = backend.detect(&[image(b"frame2")]).unwrap();
        assert_eq!(r2[0].len(), 1);
        assert_eq!(r2[0][0].track_id, Some(1));
        assert_eq!(r2[0][0].confidence, Some(STUB_CONFIDENCE));

        // Same content again: nothing.
        let r3 = backend.detect(&[image(b"frame2")]).unwrap();
        assert!(r3[0].is_empty());
    }

    #[test]
    fn returns_one_list_per_input() {
        let mut backend = StubBackend::new();
        let out = backend
            .detect(&[image(b"a"), image(b"b"), image(b"c")])
            .unwrap();
        assert_eq!(out.len(), 3);
        assert!(backend.supports(DetectionCapability::Tracking));
        assert!(!backend.supports(DetectionCapability::ObjectDetection));
    }

    #[test]
    fn track_id_follows_source_not_batch_position() {
        let mut backend = StubBackend::new();
        let yard = SourceId::new("rtsp://yard");
        let gate = SourceId::new("rtsp://gate");

        backend
            .detect_sources(&[yard.clone(), gate.clone()], &[image(b"y0"), image(b"g0")])
            .unwrap();
        let both = backend
            .detect_sources(&[yard.clone(), gate.clone()], &[image(b"y1"), image(b"g1")])
            .unwrap();
        // The yard camera has no frame this tick; gate moves to position 0.
        let gate_only = backend
            .detect_sources(&[gate.clone()], &[image(b"g2")])
            .unwrap();

        let yard_track = both[0][0].track_id;
        let gate_track = both[1][0].track_id;
        assert_ne!(yard_track, gate_track);
        assert_eq!(gate_only[0][0].track_id, gate_track);
    }

    #[test]
    fn mismatched_source_ids_are_rejected() {
        let mut backend = StubBackend::new();
        let err = backend
            .detect_sources(&[SourceId::new("a")], &[image(b"a"), image(b"b")])
            .unwrap_err();
        assert!(err.to_string().contains("1 source ids for 2 frames"));
    }
}
