//! Pipeline supervisor tying together capture, the render tick, preview
//! encoding, the watchdog and the preview server.
//!
//! Capture events are split on a forwarding thread: frames go straight into
//! the coordinator's frame slot, lifecycle signals travel to the render loop,
//! which owns the coordinator and applies them between ticks.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use overlay_core::{
    ChannelError, ChannelState, Completion, Coordinator, DetectionChannel, FrameSink,
    JpegEncoder, PushOutcome, RenderOutcome, SendOutcome, TickOutcome, WsDetectionChannel,
};
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureEvent, CaptureOptions, StreamSignal};

use crate::viewer::{
    ViewerConfig,
    data::PreviewFrames,
    encoding::{EncodeJob, spawn_encode_worker},
    server::{ServerState, spawn_preview_server},
    telemetry,
    watchdog::{HealthComponent, PipelineHealth, spawn_watchdog},
};

const ENCODE_QUEUE: usize = 2;
const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

type ViewerCoordinator = Coordinator<WsDetectionChannel, JpegEncoder>;

/// Run the viewer until Ctrl+C.
pub fn run(config: ViewerConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime(config.verbose);
    let prometheus = telemetry::init_metrics_recorder()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let pipeline_span = tracing::info_span!(
        "viewer.pipeline",
        source = %config.source,
        width = config.width,
        height = config.height,
        fps = config.fps,
        service = %config.service_url
    );
    let _pipeline_guard = pipeline_span.enter();
    debug!("Capture source: {} ({:?})", config.source, config.source_kind);

    let channel = WsDetectionChannel::connect(&config.service_url)
        .context("Failed to start detection channel")?;
    let coordinator = Coordinator::new(
        channel,
        JpegEncoder::new(config.jpeg_quality),
        config.style.clone(),
        config.send_interval,
    );
    let sink = coordinator.frame_sink();
    let store = coordinator.store();

    let capture_rx = video_ingest::spawn_capture(
        &config.source,
        CaptureOptions {
            width: config.width,
            height: config.height,
            fps: config.fps,
        },
    )
    .context("Failed to start capture")?;

    let running = Arc::new(AtomicBool::new(true));
    let health = Arc::new(PipelineHealth::new());
    let frames = PreviewFrames::default();
    let (signal_tx, signal_rx) = crossbeam_channel::unbounded::<StreamSignal>();
    let (encode_tx, encode_rx) = crossbeam_channel::bounded::<EncodeJob>(ENCODE_QUEUE);

    let capture_handle = telemetry::spawn_thread("viewer-capture", {
        let health = health.clone();
        let running = running.clone();
        let verbose = config.verbose;
        move || forward_capture(capture_rx, sink, signal_tx, &health, &running, verbose)
    })
    .context("Failed to spawn capture forwarder")?;

    let encode_handle = spawn_encode_worker(
        frames.clone(),
        JpegEncoder::new(config.jpeg_quality),
        encode_rx,
        running.clone(),
    )
    .context("Failed to spawn encode worker")?;

    let watchdog_handle =
        spawn_watchdog(health.clone(), running.clone()).context("Failed to spawn watchdog")?;

    let render_handle = telemetry::spawn_thread("viewer-render", {
        let health = health.clone();
        let running = running.clone();
        let tick_interval = config.tick_interval();
        let verbose = config.verbose;
        move || {
            let mut coordinator = coordinator;
            render_loop(
                &mut coordinator,
                &signal_rx,
                &encode_tx,
                &health,
                &running,
                tick_interval,
                verbose,
            );
            coordinator.channel_mut().close();
        }
    })
    .context("Failed to spawn render loop")?;

    let preview_server = spawn_preview_server(
        config.bind,
        ServerState {
            frames,
            store,
            prometheus,
            mjpeg_interval: config.tick_interval(),
        },
    )
    .context("Failed to start preview server")?;

    info!(
        "HTTP preview available at http://{}/ (frame.jpg, source.jpg, stream.mjpg, detections, metrics)",
        config.bind
    );

    while !shutdown.load(Ordering::SeqCst) && running.load(Ordering::SeqCst) {
        thread::sleep(SUPERVISOR_POLL);
    }

    info!("Stopping viewer");
    running.store(false, Ordering::SeqCst);
    if render_handle.join().is_err() {
        error!("Render loop panicked");
    }
    let _ = encode_handle.join();
    let _ = watchdog_handle.join();
    if capture_handle.is_finished() {
        let _ = capture_handle.join();
    } else {
        debug!("Capture forwarder still blocked on the camera; leaving it to exit with the process");
    }
    preview_server.stop();
    Ok(())
}

/// Push frames into the slot and relay lifecycle signals to the render loop.
///
/// The slot is opened here on `Started`, ahead of the render loop applying the
/// signal, so the first frames of a stream are kept rather than rejected.
fn forward_capture(
    capture_rx: Receiver<CaptureEvent>,
    sink: FrameSink,
    signal_tx: Sender<StreamSignal>,
    health: &PipelineHealth,
    running: &AtomicBool,
    verbose: bool,
) {
    let mut dropped: u64 = 0;
    for event in capture_rx {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        match event {
            CaptureEvent::Signal(signal) => {
                debug!("Capture signal: {signal:?}");
                if matches!(signal, StreamSignal::Started { .. }) {
                    sink.open();
                }
                if signal_tx.send(signal).is_err() {
                    break;
                }
            }
            CaptureEvent::Frame(frame) => {
                health.beat(HealthComponent::Capture);
                metrics::counter!("overlay_capture_frames_total").increment(1);
                let reason = match sink.push(frame) {
                    PushOutcome::Stored => continue,
                    PushOutcome::Replaced => "replaced",
                    PushOutcome::Rejected => "not_streaming",
                };
                dropped = dropped.wrapping_add(1);
                metrics::counter!("overlay_capture_dropped_frames_total", "reason" => reason)
                    .increment(1);
                if verbose {
                    debug!("Dropped frame ({reason}, dropped total: {dropped})");
                }
            }
            CaptureEvent::Error(err) => {
                warn!("Capture error: {err}");
                metrics::counter!("overlay_capture_errors_total").increment(1);
            }
        }
    }
    info!("Capture ended");
}

/// Fixed-cadence render tick. Returns once `running` drops.
fn render_loop(
    coordinator: &mut ViewerCoordinator,
    signal_rx: &Receiver<StreamSignal>,
    encode_tx: &Sender<EncodeJob>,
    health: &PipelineHealth,
    running: &AtomicBool,
    tick_interval: Duration,
    verbose: bool,
) {
    let mut frame_number: u64 = 0;
    let mut smoothed_fps: f32 = 0.0;
    let mut last_render = Instant::now();
    let mut channel_state = coordinator.channel().state();
    let mut next_tick = Instant::now();

    while running.load(Ordering::Relaxed) {
        while let Ok(signal) = signal_rx.try_recv() {
            match signal {
                StreamSignal::Started { width, height } => {
                    info!("Stream started at {width}x{height}");
                    coordinator.on_stream_started();
                }
                StreamSignal::Stopped => coordinator.on_stream_stopped(),
            }
        }

        let tick_start = Instant::now();
        let outcome = coordinator.tick(tick_start);
        health.beat(HealthComponent::Render);
        record_tick(&outcome, health, verbose);

        let state = coordinator.channel().state();
        if state != channel_state {
            info!(
                "Detection channel {} -> {}",
                channel_state.label(),
                state.label()
            );
            channel_state = state;
        }
        metrics::gauge!("overlay_channel_open").set(if state == ChannelState::Open { 1.0 } else { 0.0 });

        if outcome.rendered() {
            frame_number = frame_number.wrapping_add(1);
            let elapsed = tick_start.duration_since(last_render).as_secs_f32();
            last_render = tick_start;
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                smoothed_fps = if smoothed_fps == 0.0 {
                    instant
                } else {
                    0.9 * smoothed_fps + 0.1 * instant
                };
            }
            metrics::gauge!("overlay_render_fps").set(smoothed_fps as f64);
            if frame_number % 30 == 0 {
                debug!("Render heartbeat: frame #{frame_number}, {smoothed_fps:.1} fps");
            }
            hand_off(coordinator, encode_tx, frame_number, smoothed_fps);
        }
        metrics::histogram!("overlay_stage_latency_seconds", "stage" => "render")
            .record(tick_start.elapsed().as_secs_f64());

        next_tick += tick_interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
}

fn record_tick(outcome: &TickOutcome, health: &PipelineHealth, verbose: bool) {
    if let Some(completion) = &outcome.completion {
        health.request_finished();
        let label = match completion {
            Completion::Stored { detections } => {
                metrics::gauge!("overlay_detections").set(*detections as f64);
                "stored"
            }
            Completion::Failed(err) => error_label(err),
        };
        metrics::counter!("overlay_detection_responses_total", "outcome" => label).increment(1);
    }

    if let RenderOutcome::Rendered { send, compose } = &outcome.render {
        let label = match send {
            SendOutcome::Sent => {
                health.request_started();
                "sent"
            }
            SendOutcome::Throttled => "throttled",
            SendOutcome::ChannelNotOpen(_) => "channel_not_open",
            SendOutcome::Failed(err) => {
                health.request_finished();
                error_label(err)
            }
        };
        metrics::counter!("overlay_detection_requests_total", "outcome" => label).increment(1);
        metrics::counter!("overlay_boxes_drawn_total").increment(compose.boxes_drawn as u64);
        if verbose && compose.boxes_drawn > 0 {
            debug!(
                boxes = compose.boxes_drawn,
                labels = compose.labels_drawn,
                "overlay composited"
            );
        }
    }
}

fn error_label(err: &ChannelError) -> &'static str {
    match err {
        ChannelError::NotOpen => "not_open",
        ChannelError::Closed => "closed",
        ChannelError::Transport(_) => "transport",
        ChannelError::Decode(_) => "decode",
        ChannelError::Service(_) => "service",
        ChannelError::Encode(_) => "encode",
    }
}

fn hand_off(
    coordinator: &ViewerCoordinator,
    encode_tx: &Sender<EncodeJob>,
    frame_number: u64,
    fps: f32,
) {
    if encode_tx.is_full() {
        metrics::counter!("overlay_preview_dropped_frames_total").increment(1);
        return;
    }
    let (Some(overlay), Some(source)) = (coordinator.overlay(), coordinator.source()) else {
        return;
    };
    let job = EncodeJob {
        overlay: overlay.clone(),
        source: source.clone(),
        frame_number,
        fps,
        span: tracing::info_span!("frame", frame = frame_number),
    };
    match encode_tx.try_send(job) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            metrics::counter!("overlay_preview_dropped_frames_total").increment(1);
        }
        Err(TrySendError::Disconnected(_)) => {
            warn!("Encode worker stopped; preview frozen");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_labels_are_distinct() {
        let errors = [
            ChannelError::NotOpen,
            ChannelError::Closed,
            ChannelError::Transport(String::new()),
            ChannelError::Decode(String::new()),
            ChannelError::Service(String::new()),
            ChannelError::Encode(String::new()),
        ];
        let mut labels: Vec<&str> = errors.iter().map(error_label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), errors.len());
    }

    #[test]
    fn forwarder_routes_frames_and_signals() {
        use video_ingest::{PixelFormat, VideoFrame};

        let mut coordinator = Coordinator::new(
            WsDetectionChannel::connect("ws://127.0.0.1:1").unwrap(),
            JpegEncoder::default(),
            Default::default(),
            Duration::from_millis(100),
        );
        let (capture_tx, capture_rx) = crossbeam_channel::unbounded();
        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        let health = PipelineHealth::new();
        let running = AtomicBool::new(true);

        let frame = VideoFrame::new(4, 4, PixelFormat::Rgba8, vec![0; 64], 0).unwrap();
        capture_tx
            .send(CaptureEvent::Signal(StreamSignal::Started { width: 4, height: 4 }))
            .unwrap();
        capture_tx.send(CaptureEvent::Frame(frame)).unwrap();
        drop(capture_tx);

        forward_capture(
            capture_rx,
            coordinator.frame_sink(),
            signal_tx,
            &health,
            &running,
            false,
        );
        assert_eq!(
            signal_rx.try_recv().unwrap(),
            StreamSignal::Started { width: 4, height: 4 }
        );
        // The frame beat the render loop's start handling and is still drawn.
        coordinator.on_stream_started();
        assert!(matches!(
            coordinator.tick(Instant::now()).render,
            RenderOutcome::Rendered { .. }
        ));
        coordinator.channel_mut().close();
    }
}
