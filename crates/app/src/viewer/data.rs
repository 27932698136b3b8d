use std::sync::{Arc, Mutex};

use overlay_core::Detection;
use serde::Serialize;

#[derive(Clone)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
}

#[derive(Serialize)]
pub(crate) struct DetectionsResponse<'a> {
    /// Number of batches installed since start-up.
    pub(crate) generation: u64,
    pub(crate) processing_time: f64,
    pub(crate) count: usize,
    pub(crate) detections: &'a [Detection],
}

pub(crate) type SharedFrame = Arc<Mutex<Option<FramePacket>>>;

/// Latest encoded frames served by the preview.
#[derive(Clone, Default)]
pub(crate) struct PreviewFrames {
    /// Composited overlay.
    pub(crate) overlay: SharedFrame,
    /// Raw camera frame, for side-by-side comparison.
    pub(crate) source: SharedFrame,
}

pub(crate) fn latest(shared: &SharedFrame) -> Option<FramePacket> {
    shared.lock().ok().and_then(|guard| guard.clone())
}

pub(crate) fn publish(shared: &SharedFrame, packet: FramePacket) {
    if let Ok(mut guard) = shared.lock() {
        *guard = Some(packet);
    }
}
