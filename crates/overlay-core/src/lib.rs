//! Live-overlay core: hands camera frames to a fixed-cadence render tick,
//! offloads a throttled subset of them to a remote detection service and
//! composites the latest detections onto every rendered frame.
//!
//! The [`Coordinator`] owns the tick; the camera side only sees a
//! [`FrameSink`], and results flow back through a [`DetectionStore`].

mod channel;
mod compositor;
mod coordinator;
mod detection;
mod encoding;
mod frame_slot;
mod glyph;
mod store;
mod throttle;

pub use channel::{
    ChannelError, ChannelState, Completer, DetectionChannel, DetectionResult, PendingDetection,
    WsDetectionChannel,
};
pub use compositor::{ComposeOutcome, Compositor, OverlayBuffer, OverlayStyle, flip_y};
pub use coordinator::{
    Completion, Coordinator, PipelineState, RenderOutcome, SendOutcome, TickOutcome,
};
pub use detection::{BoundingBox, Detection, DetectionBatch, decode_response};
pub use encoding::{FrameEncoder, JpegEncoder};
pub use frame_slot::{FrameSink, FrameSlot, PushOutcome};
pub use glyph::{GLYPH_COLUMNS, GLYPH_ROWS, Glyph, UNKNOWN_GLYPH, glyph_for};
pub use store::DetectionStore;
pub use throttle::RequestThrottler;
