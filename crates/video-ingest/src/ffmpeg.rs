use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::anyhow;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

use crate::types::{CaptureError, CaptureEvent, PixelFormat, StreamSignal, VideoFrame};

/// Ingress transport used to source frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local V4L device, by index or `/dev/videoN` path.
    Device,
    /// Real-time streaming protocol feed.
    Rtsp,
    /// Pre-recorded file, replayed at its native rate.
    File,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

/// Geometry and cadence requested from the capture process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureOptions {
    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * PixelFormat::Rgba8.bytes_per_pixel()
    }
}

/// Spawns an FFmpeg process decoding `uri` into RGBA rawvideo and a thread that
/// forwards its frames.
///
/// The thread emits `Started` before the first frame and `Stopped` once the
/// process output ends. The channel is small so a stalled consumer
/// backpressures the reader instead of buffering video.
pub fn spawn_capture(
    uri: &str,
    options: CaptureOptions,
) -> Result<Receiver<CaptureEvent>, CaptureError> {
    let (tx, rx) = bounded(4);
    let mut cmd = build_command(uri, options);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| {
        warn!("failed to launch ffmpeg for {uri}: {err}");
        CaptureError::Open {
            uri: uri.to_string(),
        }
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    thread::Builder::new()
        .name("video-ingest".into())
        .spawn(move || ffmpeg_loop(stdout, child, options, tx))
        .map_err(CaptureError::Read)?;

    Ok(rx)
}

/// FFmpeg invocation for the given source, always producing top-down RGBA.
pub fn build_command(uri: &str, options: CaptureOptions) -> Command {
    let size_arg = format!("{}x{}", options.width, options.height);
    let scale_arg = format!("scale={}:{}", options.width, options.height);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    match SourceKind::from_uri(uri) {
        SourceKind::Device => {
            let device = match parse_device_index(uri) {
                Some(index) => format!("/dev/video{index}"),
                None => uri.to_string(),
            };
            cmd.arg("-f")
                .arg("video4linux2")
                .arg("-framerate")
                .arg(options.fps.to_string())
                .arg("-video_size")
                .arg(&size_arg)
                .arg("-i")
                .arg(device);
        }
        SourceKind::Rtsp => {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay")
                .arg("-i")
                .arg(uri);
        }
        SourceKind::File => {
            cmd.arg("-re").arg("-i").arg(uri);
        }
    }

    cmd.arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
    cmd
}

fn ffmpeg_loop(
    stdout: impl Read,
    mut child: Child,
    options: CaptureOptions,
    tx: Sender<CaptureEvent>,
) {
    let frames = read_frames(stdout, options, &tx);
    debug!("ffmpeg reader finished after {frames} frame(s)");
    let _ = child.kill();
    let _ = child.wait();
}

/// Read fixed-size RGBA frames until EOF, bracketing them with lifecycle signals.
///
/// Returns the number of frames forwarded. A clean EOF ends the stream quietly;
/// any other read failure is reported before `Stopped`.
pub fn read_frames(
    mut reader: impl Read,
    options: CaptureOptions,
    tx: &Sender<CaptureEvent>,
) -> u64 {
    let started = StreamSignal::Started {
        width: options.width,
        height: options.height,
    };
    if tx.send(CaptureEvent::Signal(started)).is_err() {
        return 0;
    }

    let mut buffer = vec![0u8; options.frame_bytes()];
    let mut forwarded = 0u64;
    loop {
        match reader.read_exact(&mut buffer) {
            Ok(()) => {
                let event = match VideoFrame::new(
                    options.width,
                    options.height,
                    PixelFormat::Rgba8,
                    buffer.clone(),
                    Utc::now().timestamp_millis(),
                ) {
                    Ok(frame) => CaptureEvent::Frame(frame),
                    Err(err) => CaptureEvent::Error(err.into()),
                };
                if tx.send(event).is_err() {
                    return forwarded;
                }
                forwarded += 1;
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                if tx.send(CaptureEvent::Error(CaptureError::Read(err))).is_err() {
                    return forwarded;
                }
                break;
            }
        }
    }

    let _ = tx.send(CaptureEvent::Signal(StreamSignal::Stopped));
    forwarded
}

pub(crate) fn parse_device_index(uri: &str) -> Option<u32> {
    if let Ok(index) = uri.parse::<u32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<u32>().ok();
        }
    }
    None
}
