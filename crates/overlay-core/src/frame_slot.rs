//! Latest-wins hand-off cell between the capture thread and the render tick.

use std::sync::{Arc, Mutex, MutexGuard};

use video_ingest::VideoFrame;

/// Result of offering a frame to the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The slot was empty and now holds the frame.
    Stored,
    /// An unconsumed frame was discarded in favour of this one.
    Replaced,
    /// The slot is closed (no stream registered); the frame was dropped.
    Rejected,
}

#[derive(Default)]
struct SlotState {
    open: bool,
    frame: Option<VideoFrame>,
}

/// Single-element frame holder. Pushing never blocks on the consumer and the
/// slot never holds more than one frame.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept pushes from now on. Idempotent: a closed slot is always empty,
    /// so opening an already open slot keeps its pending frame.
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Stop accepting pushes and release any pending frame.
    pub fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        state.frame = None;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn push(&self, frame: VideoFrame) -> PushOutcome {
        let mut state = self.lock();
        if !state.open {
            return PushOutcome::Rejected;
        }
        match state.frame.replace(frame) {
            Some(_) => PushOutcome::Replaced,
            None => PushOutcome::Stored,
        }
    }

    pub fn try_take(&self) -> Option<VideoFrame> {
        self.lock().frame.take()
    }

    // A panic while holding the lock cannot leave the state half-written, so a
    // poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Producer-side handle given to the camera collaborator.
#[derive(Clone)]
pub struct FrameSink {
    slot: Arc<FrameSlot>,
}

impl FrameSink {
    pub(crate) fn new(slot: Arc<FrameSlot>) -> Self {
        Self { slot }
    }

    /// Open the slot as soon as the producer knows a stream has started, so
    /// frames that beat the consumer's own start handling are kept.
    pub fn open(&self) {
        self.slot.open();
    }

    pub fn push(&self, frame: VideoFrame) -> PushOutcome {
        self.slot.push(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use video_ingest::PixelFormat;

    use super::*;

    fn frame(stamp: i64) -> VideoFrame {
        VideoFrame::new(1, 1, PixelFormat::Rgba8, vec![0, 0, 0, 255], stamp).unwrap()
    }

    #[test]
    fn closed_slot_rejects_frames() {
        let slot = FrameSlot::new();
        assert_eq!(slot.push(frame(1)), PushOutcome::Rejected);
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn latest_push_wins() {
        let slot = FrameSlot::new();
        slot.open();
        assert_eq!(slot.push(frame(1)), PushOutcome::Stored);
        assert_eq!(slot.push(frame(2)), PushOutcome::Replaced);
        assert_eq!(slot.push(frame(3)), PushOutcome::Replaced);

        let taken = slot.try_take().expect("frame pending");
        assert_eq!(taken.timestamp_ms(), 3);
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn reopening_discards_stale_frames() {
        let slot = FrameSlot::new();
        slot.open();
        slot.push(frame(1));
        slot.close();
        assert!(slot.try_take().is_none());

        slot.push(frame(2));
        slot.open();
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn producer_side_open_keeps_early_frames() {
        let slot = Arc::new(FrameSlot::new());
        let sink = FrameSink::new(slot.clone());
        sink.open();
        assert_eq!(sink.push(frame(1)), PushOutcome::Stored);

        // The consumer opening afterwards must not drop the early frame.
        slot.open();
        assert_eq!(slot.try_take().map(|f| f.timestamp_ms()), Some(1));
    }

    #[test]
    fn concurrent_producers_leave_at_most_one_frame() {
        let slot = Arc::new(FrameSlot::new());
        slot.open();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let sink = FrameSink::new(slot.clone());
                thread::spawn(move || {
                    for i in 0..100 {
                        sink.push(frame(worker * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(slot.try_take().is_some());
        assert!(slot.try_take().is_none());
    }
}
