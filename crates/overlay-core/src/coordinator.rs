//! Render-tick state machine tying the slot, throttler, store and compositor
//! together.
//!
//! Each tick first settles a finished detection request, then takes the
//! latest frame, offers it to the detection service if the throttler allows,
//! and composites it with whatever detections the store currently holds. The
//! tick never waits on the network.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};
use video_ingest::VideoFrame;

use crate::{
    channel::{ChannelError, ChannelState, DetectionChannel, PendingDetection},
    compositor::{ComposeOutcome, Compositor, OverlayBuffer, OverlayStyle},
    encoding::FrameEncoder,
    frame_slot::{FrameSink, FrameSlot},
    store::DetectionStore,
    throttle::RequestThrottler,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    Stopped,
}

impl PipelineState {
    pub fn label(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Streaming => "streaming",
            PipelineState::Stopped => "stopped",
        }
    }
}

/// How a finished detection request was settled.
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// The batch replaced the store contents.
    Stored { detections: usize },
    /// The store was left as it was.
    Failed(ChannelError),
}

/// What happened to the frame offered for detection this tick.
#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    Sent,
    /// Suppressed before touching the throttler.
    ChannelNotOpen(ChannelState),
    Throttled,
    /// The send was begun but could not be issued; the gate is open again.
    Failed(ChannelError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderOutcome {
    NotStreaming,
    /// Streaming, but no new frame arrived since the last tick.
    NoFrame,
    Rendered {
        send: SendOutcome,
        compose: ComposeOutcome,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    pub completion: Option<Completion>,
    pub render: RenderOutcome,
}

impl TickOutcome {
    pub fn rendered(&self) -> bool {
        matches!(self.render, RenderOutcome::Rendered { .. })
    }
}

/// Owns everything the render tick touches. Only the frame slot and the
/// detection store are shared with other threads.
pub struct Coordinator<C, E> {
    channel: C,
    encoder: E,
    slot: Arc<FrameSlot>,
    store: Arc<DetectionStore>,
    throttler: RequestThrottler,
    compositor: Compositor,
    pending: Option<PendingDetection>,
    source: Option<VideoFrame>,
    state: PipelineState,
}

impl<C: DetectionChannel, E: FrameEncoder> Coordinator<C, E> {
    pub fn new(channel: C, encoder: E, style: OverlayStyle, send_interval: Duration) -> Self {
        Self {
            channel,
            encoder,
            slot: Arc::new(FrameSlot::new()),
            store: Arc::new(DetectionStore::new()),
            throttler: RequestThrottler::new(send_interval),
            compositor: Compositor::new(style),
            pending: None,
            source: None,
            state: PipelineState::Idle,
        }
    }

    /// Producer handle for the camera collaborator. Pushes are dropped until
    /// the slot is opened, either here on stream start or by the producer
    /// through [`FrameSink::open`].
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink::new(self.slot.clone())
    }

    pub fn on_stream_started(&mut self) {
        if self.state == PipelineState::Streaming {
            debug!("stream start signalled while already streaming");
            return;
        }
        self.slot.open();
        self.state = PipelineState::Streaming;
        info!("stream started");
    }

    pub fn on_stream_stopped(&mut self) {
        if self.state != PipelineState::Streaming {
            debug!(state = self.state.label(), "stream stop signalled while not streaming");
            return;
        }
        self.slot.close();
        self.state = PipelineState::Stopped;
        info!("stream stopped");
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let completion = self.drain_completion();

        if self.state != PipelineState::Streaming {
            return TickOutcome {
                completion,
                render: RenderOutcome::NotStreaming,
            };
        }
        let Some(frame) = self.slot.try_take() else {
            return TickOutcome {
                completion,
                render: RenderOutcome::NoFrame,
            };
        };

        let frame: &VideoFrame = self.source.insert(frame);
        let send = offer_frame(
            &self.channel,
            &self.encoder,
            &mut self.throttler,
            &mut self.pending,
            frame,
            now,
        );
        let detections = self.store.snapshot();
        let compose = self.compositor.compose(frame, &detections);
        if compose.resized {
            info!(
                width = frame.width(),
                height = frame.height(),
                "overlay surface changed"
            );
        }

        TickOutcome {
            completion,
            render: RenderOutcome::Rendered { send, compose },
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn overlay(&self) -> Option<&OverlayBuffer> {
        self.compositor.buffer()
    }

    /// The frame most recently drawn.
    pub fn source(&self) -> Option<&VideoFrame> {
        self.source.as_ref()
    }

    pub fn store(&self) -> Arc<DetectionStore> {
        self.store.clone()
    }

    pub fn throttler(&self) -> &RequestThrottler {
        &self.throttler
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn style(&self) -> &OverlayStyle {
        self.compositor.style()
    }

    fn drain_completion(&mut self) -> Option<Completion> {
        let result = self.pending.as_mut()?.poll()?;
        self.pending = None;
        self.throttler.on_send_completed();

        Some(match result {
            Ok(batch) => {
                let detections = batch.detections.len();
                debug!(
                    detections,
                    processing_time = batch.processing_time,
                    "detections received"
                );
                self.store.replace(batch);
                Completion::Stored { detections }
            }
            Err(err) => {
                warn!("detection request failed: {err}");
                Completion::Failed(err)
            }
        })
    }
}

fn offer_frame<C: DetectionChannel, E: FrameEncoder>(
    channel: &C,
    encoder: &E,
    throttler: &mut RequestThrottler,
    pending: &mut Option<PendingDetection>,
    frame: &VideoFrame,
    now: Instant,
) -> SendOutcome {
    let state = channel.state();
    if state != ChannelState::Open {
        return SendOutcome::ChannelNotOpen(state);
    }
    if !throttler.try_begin_send(now) {
        debug!(
            interval_ms = throttler.interval().as_millis() as u64,
            in_flight = throttler.in_flight(),
            "detection send throttled"
        );
        return SendOutcome::Throttled;
    }

    let issued = encoder.encode(frame).and_then(|image| channel.send(image));
    match issued {
        Ok(handle) => {
            *pending = Some(handle);
            SendOutcome::Sent
        }
        Err(err) => {
            warn!("failed to issue detection request: {err}");
            throttler.on_send_completed();
            SendOutcome::Failed(err)
        }
    }
}
