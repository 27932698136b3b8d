//! Actix Web preview server exposing the overlay, the raw feed and the
//! detection store.
//!
//! The server runs on a dedicated thread so the render tick never shares a
//! runtime with HTTP handlers.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use metrics_exporter_prometheus::PrometheusHandle;
use overlay_core::DetectionStore;
use tokio::sync::oneshot;
use tracing::error;

use crate::viewer::data::{DetectionsResponse, FramePacket, PreviewFrames, SharedFrame, latest};

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) frames: PreviewFrames,
    pub(crate) store: Arc<DetectionStore>,
    pub(crate) prometheus: PrometheusHandle,
    pub(crate) mjpeg_interval: Duration,
}

/// Handle for the preview server thread.
#[derive(Default)]
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the preview server thread and return a handle that can stop it.
pub(crate) fn spawn_preview_server(
    bind: SocketAddr,
    state: ServerState,
) -> Result<PreviewServer> {
    let state = web::Data::new(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = std::thread::Builder::new()
        .name("viewer-preview-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(state.clone())
                        .route("/", web::get().to(index_route))
                        .route("/frame.jpg", web::get().to(frame_handler))
                        .route("/source.jpg", web::get().to(source_handler))
                        .route("/stream.mjpg", web::get().to(stream_handler))
                        .route("/detections", web::get().to(detections_handler))
                        .route("/metrics", web::get().to(metrics_handler))
                })
                .workers(2)
                .bind(bind)?
                .run();

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

fn jpeg_response(shared: &SharedFrame) -> HttpResponse {
    match latest(shared) {
        Some(packet) => HttpResponse::Ok()
            .insert_header(("X-Sequence", packet.frame_number.to_string()))
            .insert_header(("X-Timestamp-Ms", packet.timestamp_ms.to_string()))
            .insert_header(("X-Fps", format!("{:.1}", packet.fps)))
            .content_type("image/jpeg")
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Latest composited frame.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    jpeg_response(&state.frames.overlay)
}

/// Latest raw camera frame.
async fn source_handler(state: web::Data<ServerState>) -> HttpResponse {
    jpeg_response(&state.frames.source)
}

/// One `--frame` part of the multipart MJPEG stream.
fn mjpeg_part(packet: &FramePacket) -> Vec<u8> {
    let mut payload = Vec::with_capacity(packet.jpeg.len() + 96);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(format!("X-Sequence: {}\r\n", packet.frame_number).as_bytes());
    payload.extend_from_slice(format!("X-Fps: {:.1}\r\n", packet.fps).as_bytes());
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(&packet.jpeg);
    payload.extend_from_slice(b"\r\n");
    payload
}

/// Stream the overlay as MJPEG over a multipart response.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(state.mjpeg_interval);
        let mut last_sent = None;
        loop {
            interval.tick().await;
            let Some(packet) = latest(&state.frames.overlay) else {
                continue;
            };
            if last_sent == Some(packet.frame_number) {
                continue;
            }
            last_sent = Some(packet.frame_number);

            yield Ok::<Bytes, actix_web::Error>(Bytes::from(mjpeg_part(&packet)));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Serve the side-by-side viewer page.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::VIEWER_INDEX_HTML)
}

/// Return the detection store snapshot as JSON.
async fn detections_handler(state: web::Data<ServerState>) -> HttpResponse {
    let (detections, processing_time, generation) = state.store.snapshot_with_meta();
    HttpResponse::Ok().json(DetectionsResponse {
        generation,
        processing_time,
        count: detections.len(),
        detections: &detections,
    })
}

async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.prometheus.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer::data::publish;

    fn packet() -> FramePacket {
        FramePacket {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            timestamp_ms: 1_700,
            frame_number: 42,
            fps: 29.97,
        }
    }

    #[test]
    fn frame_response_carries_sequence_and_rate() {
        let shared = SharedFrame::default();
        assert_eq!(jpeg_response(&shared).status(), 204);

        publish(&shared, packet());
        let response = jpeg_response(&shared);
        let headers = response.headers();
        assert_eq!(headers.get("X-Sequence").unwrap(), "42");
        assert_eq!(headers.get("X-Timestamp-Ms").unwrap(), "1700");
        assert_eq!(headers.get("X-Fps").unwrap(), "30.0");
    }

    #[test]
    fn mjpeg_part_frames_the_jpeg() {
        let part = mjpeg_part(&packet());
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\nX-Sequence: 42\r\nX-Fps: 30.0\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']));
    }
}
