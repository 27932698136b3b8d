//! Thread-safe holder for the most recent successful detection batch.

use std::sync::{Arc, Mutex};

use crate::detection::{Detection, DetectionBatch};

/// Current detections, swapped and read under one short critical section each.
///
/// Readers receive a shared immutable snapshot, so drawing happens without the
/// lock held.
#[derive(Default)]
pub struct DetectionStore {
    current: Mutex<Current>,
}

#[derive(Default)]
struct Current {
    detections: Arc<[Detection]>,
    processing_time: f64,
    generation: u64,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `batch` as the current detections.
    pub fn replace(&self, batch: DetectionBatch) {
        let detections: Arc<[Detection]> = batch.detections.into();
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        current.detections = detections;
        current.processing_time = batch.processing_time;
        current.generation += 1;
    }

    pub fn snapshot(&self) -> Arc<[Detection]> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .detections
            .clone()
    }

    /// Snapshot plus the service processing time and the number of batches
    /// installed so far.
    pub fn snapshot_with_meta(&self) -> (Arc<[Detection]>, f64, u64) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (
            current.detections.clone(),
            current.processing_time,
            current.generation,
        )
    }
}
