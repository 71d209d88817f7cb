use crate::frame::Frame;

/// Keeps every frame offered while the window is open.
#[derive(Debug, Default)]
pub struct RawBuffer {
    frames: Vec<Frame>,
}

impl RawBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn get_frames(&self) -> Vec<Frame> {
        self.frames.clone()
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
