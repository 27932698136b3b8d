//! Preview encoder stage.
//!
//! The render loop hands over copies of the composited overlay and the raw
//! frame; this worker turns them into JPEG packets for the HTTP preview so
//! encoding never delays the next tick.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::Result;
use crossbeam_channel::Receiver;
use overlay_core::{ChannelError, FrameEncoder, JpegEncoder, OverlayBuffer};
use tracing::{Span, warn};
use video_ingest::VideoFrame;

use crate::viewer::{
    data::{FramePacket, PreviewFrames, publish},
    telemetry,
};

/// One rendered tick to publish.
pub(crate) struct EncodeJob {
    pub(crate) overlay: OverlayBuffer,
    pub(crate) source: VideoFrame,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
    pub(crate) span: Span,
}

/// Spawn the dedicated preview encoder thread.
pub(crate) fn spawn_encode_worker(
    frames: PreviewFrames,
    encoder: JpegEncoder,
    encode_rx: Receiver<EncodeJob>,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let handle = telemetry::spawn_thread("viewer-encoding", move || {
        let worker_span = tracing::info_span!("encoding.worker", codec = "jpeg");
        let _worker_guard = worker_span.enter();
        let depth_watch = encode_rx.clone();
        for job in encode_rx {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            metrics::gauge!("overlay_queue_depth", "queue" => "encoding")
                .set(depth_watch.len() as f64);

            let _job_guard = job.span.enter();
            let encode_start = Instant::now();
            match encode_job(&encoder, &job) {
                Ok((overlay, source)) => {
                    publish(&frames.overlay, overlay);
                    publish(&frames.source, source);
                }
                Err(err) => {
                    warn!("Preview encode failed: {err}");
                    metrics::counter!("overlay_encoding_errors_total").increment(1);
                }
            }
            metrics::histogram!("overlay_stage_latency_seconds", "stage" => "encoding")
                .record(encode_start.elapsed().as_secs_f64());
        }
    })?;
    Ok(handle)
}

fn encode_job(
    encoder: &JpegEncoder,
    job: &EncodeJob,
) -> Result<(FramePacket, FramePacket), ChannelError> {
    let timestamp_ms = job.source.timestamp_ms();
    let packet = |jpeg| FramePacket {
        jpeg,
        timestamp_ms,
        frame_number: job.frame_number,
        fps: job.fps,
    };
    let overlay = encoder.encode_overlay(&job.overlay)?;
    let source = encoder.encode(&job.source)?;
    Ok((packet(overlay), packet(source)))
}
