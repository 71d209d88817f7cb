use crate::frame::Frame;

/// Keeps one frame out of every `sample_interval_secs * frames_per_second`.
///
/// The cadence counter survives `reset()`: sampling phase follows a global
/// frame count and is not re-aligned to the start of each window. Call
/// `reset_phase()` to re-align explicitly.
#[derive(Debug)]
pub struct SamplingBuffer {
    frames: Vec<Frame>,
    every: u64,
    counter: u64,
}

impl SamplingBuffer {
    pub fn new(sample_interval_secs: u32, frames_per_second: u32) -> Self {
        let every = (u64::from(sample_interval_secs) * u64::from(frames_per_second)).max(1);
        Self {
            frames: Vec::new(),
            every,
            counter: 0,
        }
    }

    /// Frames between two retained samples.
    pub fn every(&self) -> u64 {
        self.every
    }

    pub fn add_frame(&mut self, frame: Frame) {
        if self.counter == 0 {
            self.frames.push(frame);
        }
        self.counter = (self.counter + 1) % self.every;
    }

    pub fn get_frames(&self) -> Vec<Frame> {
        self.frames.clone()
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    pub fn reset_phase(&mut self) {
        self.counter = 0;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::test_support::frame;

    #[test]
    fn keeps_one_frame_per_interval() {
        let mut buffer = SamplingBuffer::new(2, 10);
        assert_eq!(buffer.every(), 20);

        for t in 0..20 {
            buffer.add_frame(frame(t, vec![]));
        }
        let frames = buffer.get_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_millis(), 0);

        for t in 20..60 {
            buffer.add_frame(frame(t, vec![]));
        }
        let kept: Vec<u128> = buffer.get_frames().iter().map(|f| f.timestamp_millis()).collect();
        assert_eq!(kept, vec![0, 20_000, 40_000]);
    }

    #[test]
    fn phase_survives_reset() {
        let mut buffer = SamplingBuffer::new(1, 4);
        for t in 0..3 {
            buffer.add_frame(frame(t, vec![]));
        }
        buffer.reset();
        assert!(buffer.is_empty());

        // Counter is at 3: the next frame is skipped, the one after is kept.
        buffer.add_frame(frame(3, vec![]));
        assert!(buffer.is_empty());
        buffer.add_frame(frame(4, vec![]));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn reset_phase_realigns() {
        let mut buffer = SamplingBuffer::new(1, 4);
        buffer.add_frame(frame(0, vec![]));
        buffer.reset();
        buffer.reset_phase();
        buffer.add_frame(frame(1, vec![]));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn zero_parameters_keep_everything() {
        let mut buffer = SamplingBuffer::new(0, 15);
        for t in 0..3 {
            buffer.add_frame(frame(t, vec![]));
        }
        assert_eq!(buffer.len(), 3);
    }
}
