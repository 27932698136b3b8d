use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    time::{Duration, Instant},
};

use overlay_core::{
    ChannelError, ChannelState, Completer, Coordinator, DetectionChannel, DetectionResult,
    FrameEncoder, OverlayStyle, PendingDetection, RenderOutcome, SendOutcome, decode_response,
};
use video_ingest::{PixelFormat, VideoFrame};

const GREEN: [u8; 4] = [0, 255, 0, 255];

/// Answers each request from a script as soon as it is sent. Requests beyond
/// the script stay outstanding.
struct ScriptedChannel {
    state: Cell<ChannelState>,
    script: RefCell<VecDeque<DetectionResult>>,
    held: RefCell<Vec<Completer>>,
    sends: Cell<usize>,
}

impl ScriptedChannel {
    fn new(script: Vec<DetectionResult>) -> Self {
        Self {
            state: Cell::new(ChannelState::Open),
            script: RefCell::new(script.into()),
            held: RefCell::new(Vec::new()),
            sends: Cell::new(0),
        }
    }

    /// Replies every request with an empty batch.
    fn echo() -> Self {
        Self::new(Vec::new()).with_default_reply()
    }

    fn with_default_reply(self) -> Self {
        for _ in 0..64 {
            let reply = r#"{"detections": [], "count": 0, "processing_time": 0.01}"#;
            self.script.borrow_mut().push_back(decode_response(reply));
        }
        self
    }
}

impl DetectionChannel for ScriptedChannel {
    fn state(&self) -> ChannelState {
        self.state.get()
    }

    fn send(&self, _image: Vec<u8>) -> Result<PendingDetection, ChannelError> {
        self.sends.set(self.sends.get() + 1);
        let (completer, pending) = PendingDetection::new();
        match self.script.borrow_mut().pop_front() {
            Some(result) => completer.complete(result),
            None => self.held.borrow_mut().push(completer),
        }
        Ok(pending)
    }
}

struct RawEncoder;

impl FrameEncoder for RawEncoder {
    fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>, ChannelError> {
        Ok(frame.data().to_vec())
    }
}

fn grey_frame(width: u32, height: u32) -> VideoFrame {
    let data = vec![90; (width * height * 4) as usize];
    VideoFrame::new(width, height, PixelFormat::Rgba8, data, 0).unwrap()
}

fn coordinator(
    channel: ScriptedChannel,
    interval: Duration,
) -> Coordinator<ScriptedChannel, RawEncoder> {
    Coordinator::new(channel, RawEncoder, OverlayStyle::default(), interval)
}

#[test]
fn fast_frames_are_throttled_to_the_send_interval() {
    let interval = Duration::from_millis(300);
    let mut coordinator = coordinator(ScriptedChannel::echo(), interval);
    let sink = coordinator.frame_sink();
    coordinator.on_stream_started();

    let start = Instant::now();
    let mut sent = 0;
    for step in 0..20u64 {
        sink.push(grey_frame(16, 16));
        let outcome = coordinator.tick(start + Duration::from_millis(step * 50));
        if let RenderOutcome::Rendered { send: SendOutcome::Sent, .. } = outcome.render {
            sent += 1;
        }
    }

    assert_eq!(sent, 4);
    assert_eq!(coordinator.channel().sends.get(), 4);
    let elapsed = Duration::from_millis(950);
    let bound = (elapsed.as_secs_f64() / interval.as_secs_f64()).ceil() as usize + 1;
    assert!(sent <= bound);
}

#[test]
fn outstanding_request_blocks_further_sends() {
    let mut coordinator = coordinator(ScriptedChannel::new(Vec::new()), Duration::from_millis(10));
    let sink = coordinator.frame_sink();
    coordinator.on_stream_started();

    let start = Instant::now();
    for step in 0..10u64 {
        sink.push(grey_frame(8, 8));
        coordinator.tick(start + Duration::from_millis(step * 100));
    }
    assert_eq!(coordinator.channel().sends.get(), 1);
    assert!(coordinator.throttler().in_flight());
}

#[test]
fn error_response_keeps_the_previous_overlay() {
    let script = vec![
        decode_response(
            r#"{"detections": [{"data": "", "bbox": [4, 20, 40, 50], "confidence": 0.9, "decoded": "HELLO"}],
                "count": 1, "processing_time": 0.02}"#,
        ),
        decode_response(r#"{"error": "model failed"}"#),
    ];
    let mut coordinator = coordinator(ScriptedChannel::new(script), Duration::from_millis(300));
    let sink = coordinator.frame_sink();
    coordinator.on_stream_started();
    let start = Instant::now();

    sink.push(grey_frame(64, 64));
    coordinator.tick(start);

    sink.push(grey_frame(64, 64));
    coordinator.tick(start + Duration::from_millis(350));
    let good_overlay = coordinator.overlay().cloned();
    let good_store = coordinator.store().snapshot();
    assert_eq!(good_store.len(), 1);

    sink.push(grey_frame(64, 64));
    let outcome = coordinator.tick(start + Duration::from_millis(700));
    assert!(matches!(
        outcome.completion,
        Some(overlay_core::Completion::Failed(ChannelError::Service(ref message))) if message == "model failed"
    ));
    assert_eq!(*coordinator.store().snapshot(), *good_store);
    assert_eq!(coordinator.overlay().cloned(), good_overlay);
}

#[test]
fn box_without_text_draws_no_label() {
    let script = vec![decode_response(
        r#"{"detections": [{"data": "", "bbox": [0, 0, 10, 10], "decoded": null}], "count": 1, "processing_time": 0.0}"#,
    )];
    let mut coordinator = coordinator(ScriptedChannel::new(script), Duration::from_millis(100));
    let sink = coordinator.frame_sink();
    coordinator.on_stream_started();
    let start = Instant::now();

    sink.push(grey_frame(32, 32));
    coordinator.tick(start);
    sink.push(grey_frame(32, 32));
    let outcome = coordinator.tick(start + Duration::from_millis(200));

    let RenderOutcome::Rendered { compose, .. } = outcome.render else {
        panic!("expected a rendered tick");
    };
    assert_eq!(compose.boxes_drawn, 1);
    assert_eq!(compose.labels_drawn, 0);
    let overlay = coordinator.overlay().unwrap();
    assert_eq!(overlay.image_pixel(0, 0), Some(GREEN));
    assert_eq!(overlay.image_pixel(5, 5), Some([90, 90, 90, 90]));
}

#[test]
fn box_lands_on_flipped_rows_of_a_vga_surface() {
    let script = vec![decode_response(
        r#"{"detections": [{"data": "", "bbox": [100, 200, 300, 400]}], "processing_time": 0.0}"#,
    )];
    let mut coordinator = coordinator(ScriptedChannel::new(script), Duration::from_millis(100));
    let sink = coordinator.frame_sink();
    coordinator.on_stream_started();
    let start = Instant::now();

    sink.push(grey_frame(640, 480));
    coordinator.tick(start);
    sink.push(grey_frame(640, 480));
    coordinator.tick(start + Duration::from_millis(200));

    let overlay = coordinator.overlay().unwrap();
    for x in [100, 200, 299] {
        assert_eq!(overlay.pixel(x, 279), Some(GREEN));
        assert_eq!(overlay.pixel(x, 79), Some(GREEN));
    }
    assert_eq!(overlay.pixel(99, 279), Some([90, 90, 90, 90]));
    assert_eq!(overlay.pixel(301, 279), Some([90, 90, 90, 90]));
    assert_eq!(overlay.pixel(200, 200), Some([90, 90, 90, 90]));
}

#[test]
fn channel_that_is_not_open_is_never_used() {
    let channel = ScriptedChannel::echo();
    channel.state.set(ChannelState::Closed);
    let mut coordinator = coordinator(channel, Duration::from_millis(100));
    let sink = coordinator.frame_sink();
    coordinator.on_stream_started();

    let start = Instant::now();
    for step in 0..5u64 {
        sink.push(grey_frame(8, 8));
        let outcome = coordinator.tick(start + Duration::from_millis(step * 200));
        assert!(matches!(
            outcome.render,
            RenderOutcome::Rendered {
                send: SendOutcome::ChannelNotOpen(ChannelState::Closed),
                ..
            }
        ));
    }
    assert_eq!(coordinator.channel().sends.get(), 0);
    assert!(!coordinator.throttler().in_flight());
}
