use std::collections::BTreeSet;

use crate::frame::Detection;

/// Post-detection filter.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionFilter {
    /// Drop detections whose confidence is below the threshold. Detections
    /// without a confidence are kept.
    MinConfidence(f32),
    /// Keep only detections of the listed class ids.
    Classes(BTreeSet<u32>),
}

impl DetectionFilter {
    fn keeps(&self, detection: &Detection) -> bool {
        match self {
            Self::MinConfidence(threshold) => detection
                .confidence
                .map_or(true, |confidence| confidence >= *threshold),
            Self::Classes(classes) => detection
                .class_id
                .is_some_and(|class_id| classes.contains(&class_id)),
        }
    }
}

/// Filters applied in order to every detector result.
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    filters: Vec<DetectionFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: DetectionFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: DetectionFilter) {
        self.filters.push(filter);
    }

    pub fn apply(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        for filter in &self.filters {
            detections.retain(|detection| filter.keeps(detection));
        }
        detections
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
