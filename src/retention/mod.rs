//! Frame retention policies.
//!
//! A policy decides which frames of an open detection window survive until the
//! window is flushed. The set is closed:
//! - `Raw`: every frame
//! - `Sampling`: every Nth frame on a global cadence
//! - `MostAccurateFrame`: the highest-confidence frame per (track, class)
//! - `StartAndEnd`: earliest and latest frame per (track, class)
//!
//! All variants share one contract: `add_frame`, `get_frames` (restartable,
//! does not consume) and `reset` (called once per flush).

mod most_accurate;
mod raw;
mod sampling;
mod start_end;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::frame::Frame;

pub use most_accurate::{AccurateEntry, MostAccurateFrameBuffer};
pub use raw::RawBuffer;
pub use sampling::SamplingBuffer;
pub use start_end::{SpanEntry, StartAndEndBuffer};

pub const DEFAULT_SAMPLE_INTERVAL_SECS: u32 = 1;
pub const DEFAULT_FRAMES_PER_SECOND: u32 = 15;

/// Policy selection as it appears in configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionConfig {
    #[default]
    Raw,
    Sampling {
        #[serde(default = "default_sample_interval")]
        sample_interval_secs: u32,
        #[serde(default = "default_frames_per_second")]
        frames_per_second: u32,
    },
    MostAccurateFrame,
    StartAndEnd,
}

fn default_sample_interval() -> u32 {
    DEFAULT_SAMPLE_INTERVAL_SECS
}

fn default_frames_per_second() -> u32 {
    DEFAULT_FRAMES_PER_SECOND
}

impl RetentionConfig {
    /// Parse a bare policy name (`raw`, `sampling`, `most_accurate_frame`,
    /// `start_and_end`). Sampling gets its default parameters.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "raw" => Ok(Self::Raw),
            "sampling" => Ok(Self::Sampling {
                sample_interval_secs: DEFAULT_SAMPLE_INTERVAL_SECS,
                frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            }),
            "most_accurate_frame" | "most_accurate" => Ok(Self::MostAccurateFrame),
            "start_and_end" => Ok(Self::StartAndEnd),
            other => Err(anyhow!("unknown retention policy '{}'", other)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Self::Sampling {
            sample_interval_secs,
            frames_per_second,
        } = self
        {
            if *sample_interval_secs == 0 {
                return Err(anyhow!("sample_interval_secs must be greater than zero"));
            }
            if *frames_per_second == 0 {
                return Err(anyhow!("frames_per_second must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Identity-keyed policies only work with a tracking detector.
    pub fn requires_tracking(&self) -> bool {
        matches!(self, Self::MostAccurateFrame | Self::StartAndEnd)
    }

    pub fn build(&self) -> RetentionPolicy {
        match self {
            Self::Raw => RetentionPolicy::Raw(RawBuffer::new()),
            Self::Sampling {
                sample_interval_secs,
                frames_per_second,
            } => RetentionPolicy::Sampling(SamplingBuffer::new(
                *sample_interval_secs,
                *frames_per_second,
            )),
            Self::MostAccurateFrame => {
                RetentionPolicy::MostAccurateFrame(MostAccurateFrameBuffer::new())
            }
            Self::StartAndEnd => RetentionPolicy::StartAndEnd(StartAndEndBuffer::new()),
        }
    }
}

/// The active retention policy of a detection window.
#[derive(Debug)]
pub enum RetentionPolicy {
    Raw(RawBuffer),
    Sampling(SamplingBuffer),
    MostAccurateFrame(MostAccurateFrameBuffer),
    StartAndEnd(StartAndEndBuffer),
}

impl RetentionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Sampling(_) => "sampling",
            Self::MostAccurateFrame(_) => "most_accurate_frame",
            Self::StartAndEnd(_) => "start_and_end",
        }
    }

    /// Offer one annotated frame to the policy.
    pub fn add_frame(&mut self, frame: Frame) {
        match self {
            Self::Raw(buffer) => buffer.add_frame(frame),
            Self::Sampling(buffer) => buffer.add_frame(frame),
            Self::MostAccurateFrame(buffer) => buffer.add_frame(frame),
            Self::StartAndEnd(buffer) => buffer.add_frame(frame),
        }
    }

    /// Current retained set. Repeated calls without `add_frame`/`reset` in
    /// between return equal sequences.
    pub fn get_frames(&self) -> Vec<Frame> {
        match self {
            Self::Raw(buffer) => buffer.get_frames(),
            Self::Sampling(buffer) => buffer.get_frames(),
            Self::MostAccurateFrame(buffer) => buffer.get_frames(),
            Self::StartAndEnd(buffer) => buffer.get_frames(),
        }
    }

    /// Drop everything retained for the current window.
    pub fn reset(&mut self) {
        match self {
            Self::Raw(buffer) => buffer.reset(),
            Self::Sampling(buffer) => buffer.reset(),
            Self::MostAccurateFrame(buffer) => buffer.reset(),
            Self::StartAndEnd(buffer) => buffer.reset(),
        }
    }

    /// Number of retained entries (frames for Raw/Sampling, pairs otherwise).
    pub fn len(&self) -> usize {
        match self {
            Self::Raw(buffer) => buffer.len(),
            Self::Sampling(buffer) => buffer.len(),
            Self::MostAccurateFrame(buffer) => buffer.len(),
            Self::StartAndEnd(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionConfig::default().build()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use crate::frame::{BoundingBox, Detection, Frame, RawImage, SourceId};

    pub fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    pub fn tracked(track_id: u32, class_id: u32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0), confidence, class_id, Some(track_id))
    }

    pub fn frame(secs: u64, detections: Vec<Detection>) -> Frame {
        Frame::new(
            RawImage::new(vec![0u8; 12], 2, 2),
            detections,
            at(secs),
            SourceId::new("stub://test"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{frame, tracked};
    use super::*;

    fn all_policies() -> Vec<RetentionPolicy> {
        vec![
            RetentionConfig::Raw.build(),
            RetentionConfig::Sampling {
                sample_interval_secs: 1,
                frames_per_second: 1,
            }
            .build(),
            RetentionConfig::MostAccurateFrame.build(),
            RetentionConfig::StartAndEnd.build(),
        ]
    }

    #[test]
    fn reset_empties_every_policy() {
        for mut policy in all_policies() {
            for t in 0..5 {
                policy.add_frame(frame(t, vec![tracked(1, 2, 0.5)]));
            }
            assert!(!policy.get_frames().is_empty(), "{} retained nothing", policy.name());
            policy.reset();
            assert!(policy.get_frames().is_empty(), "{} kept frames", policy.name());
            assert!(policy.is_empty());
        }
    }

    #[test]
    fn get_frames_is_restartable() {
        for mut policy in all_policies() {
            policy.add_frame(frame(0, vec![tracked(1, 2, 0.4)]));
            policy.add_frame(frame(1, vec![tracked(3, 2, 0.6)]));
            let first = policy.get_frames();
            let second = policy.get_frames();
            assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(second.iter()) {
                assert!(Frame::same_frame(a, b), "{} reordered frames", policy.name());
            }
        }
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!(RetentionConfig::from_name("raw").unwrap(), RetentionConfig::Raw);
        assert_eq!(
            RetentionConfig::from_name("Most-Accurate-Frame").unwrap(),
            RetentionConfig::MostAccurateFrame
        );
        assert_eq!(
            RetentionConfig::from_name("start_and_end").unwrap(),
            RetentionConfig::StartAndEnd
        );
        assert!(matches!(
            RetentionConfig::from_name("sampling").unwrap(),
            RetentionConfig::Sampling { .. }
        ));
        assert!(RetentionConfig::from_name("everything").is_err());
    }

    #[test]
    fn deserializes_tagged_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            retention: RetentionConfig,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [retention]
            policy = "sampling"
            sample_interval_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.retention,
            RetentionConfig::Sampling {
                sample_interval_secs: 2,
                frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            }
        );
    }

    #[test]
    fn rejects_zero_sampling_parameters() {
        let cfg = RetentionConfig::Sampling {
            sample_interval_secs: 0,
            frames_per_second: 10,
        };
        assert!(cfg.validate().is_err());
        assert!(RetentionConfig::StartAndEnd.validate().is_ok());
    }

    #[test]
    fn identity_policies_need_tracking() {
        assert!(RetentionConfig::MostAccurateFrame.requires_tracking());
        assert!(RetentionConfig::StartAndEnd.requires_tracking());
        assert!(!RetentionConfig::Raw.requires_tracking());
    }
}
