//! Camera capture front-end.
//!
//! Frames are decoded by an `ffmpeg` subprocess into top-down RGBA and handed
//! over a bounded channel together with stream start/stop signals.

mod ffmpeg;
mod types;

pub use ffmpeg::{CaptureOptions, SourceKind, build_command, read_frames, spawn_capture};
pub use types::{CaptureError, CaptureEvent, FrameError, PixelFormat, StreamSignal, VideoFrame};
