use anyhow::Result;

use crate::frame::{Detection, RawImage, SourceId};

/// What a detector backend can produce.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    Motion,
    ObjectDetection,
    /// Stable track ids across consecutive frames.
    Tracking,
}

/// Detector backend trait.
///
/// `detect` receives one batch of frames (one per source that had a frame this
/// tick) and returns one detection list per input frame, in input order.
/// Confidence is in `[0, 1]`; class and track ids are small integers, track id
/// may be unset.
///
/// Errors are fatal for the current tick and propagate to the caller.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a batch of frames.
    fn detect(&mut self, batch: &[RawImage]) -> Result<Vec<Vec<Detection>>>;

    /// Like `detect`, with `sources[i]` naming the stream of `batch[i]`.
    ///
    /// Trackers that key identity on the stream override this; the default
    /// ignores the ids.
    fn detect_sources(
        &mut self,
        sources: &[SourceId],
        batch: &[RawImage],
    ) -> Result<Vec<Vec<Detection>>> {
        let _ = sources;
        self.detect(batch)
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
