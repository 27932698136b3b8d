//! Configuration parsing for the overlay viewer.
//!
//! CLI flags are validated once here and turned into a `ViewerConfig` that the
//! pipeline stages read without re-parsing anything.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use overlay_core::OverlayStyle;
use video_ingest::SourceKind;

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage of the viewer.
pub struct ViewerConfig {
    /// Camera device index, `/dev/videoN`, RTSP URL or file path.
    pub source: String,
    pub source_kind: SourceKind,
    /// Capture size requested from the camera.
    pub width: u32,
    pub height: u32,
    /// Render tick rate; also the capture frame rate for local devices.
    pub fps: u32,
    /// WebSocket endpoint of the detection service.
    pub service_url: String,
    /// Minimum gap between two detection requests.
    pub send_interval: Duration,
    pub style: OverlayStyle,
    /// JPEG quality for both detection requests and the preview.
    pub jpeg_quality: u8,
    /// Preview server listen address.
    pub bind: SocketAddr,
    /// Debug-level logging and per-frame drop warnings.
    pub verbose: bool,
}

/// CLI arguments accepted by the viewer.
#[derive(Debug, Args)]
pub struct ViewerCliArgs {
    /// Camera URI or device identifier.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i64,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: i64,
    /// Render ticks per second.
    #[arg(long = "fps", value_name = "N", default_value_t = 30)]
    pub fps: u32,
    /// Detection service WebSocket URL.
    #[arg(long = "service-url", value_name = "URL", default_value = "ws://localhost:8765")]
    pub service_url: String,
    /// Minimum milliseconds between detection requests.
    #[arg(long = "send-interval-ms", value_name = "MS", default_value_t = 100)]
    pub send_interval_ms: u64,
    /// Bounding box border thickness in pixels.
    #[arg(long = "thickness", value_name = "PX")]
    pub thickness: Option<u32>,
    /// Label font height in pixels.
    #[arg(long = "font-size", value_name = "PX")]
    pub font_size: Option<u32>,
    /// Border and label colour as RRGGBB or RRGGBBAA hex.
    #[arg(long = "color", value_name = "HEX")]
    pub color: Option<String>,
    /// Longest label shown before it is shortened with "...".
    #[arg(long = "max-label-chars", value_name = "N")]
    pub max_label_chars: Option<usize>,
    /// JPEG quality used by the encoder (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 80)]
    pub jpeg_quality: i32,
    /// Preview server address.
    #[arg(long = "bind", value_name = "ADDR", default_value = "127.0.0.1:8080")]
    pub bind: String,
    /// Enable verbose logging (frame drops, request outcomes).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl TryFrom<ViewerCliArgs> for ViewerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ViewerCliArgs) -> Result<Self> {
        if args.source.trim().is_empty() {
            bail!("--source must not be empty");
        }
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        let width = u32::try_from(args.width).context("--width is too large")?;
        let height = u32::try_from(args.height).context("--height is too large")?;

        if !(1..=240).contains(&args.fps) {
            bail!("--fps must be between 1 and 240");
        }

        if !args.service_url.starts_with("ws://") {
            bail!("--service-url must be a ws:// URL (got {})", args.service_url);
        }

        let defaults = OverlayStyle::default();
        let thickness = args.thickness.unwrap_or(defaults.thickness);
        if thickness == 0 {
            bail!("--thickness must be at least 1");
        }
        let font_size = args.font_size.unwrap_or(defaults.font_size);
        if !(7..=256).contains(&font_size) {
            bail!("--font-size must be between 7 and 256");
        }
        let color = match args.color.as_deref() {
            Some(hex) => parse_color(hex)?,
            None => defaults.color,
        };
        let max_label_chars = args.max_label_chars.unwrap_or(defaults.max_label_chars);
        if max_label_chars == 0 {
            bail!("--max-label-chars must be at least 1");
        }

        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let bind = args.bind.parse::<SocketAddr>().with_context(|| {
            format!("--bind must be an address like 127.0.0.1:8080 (got {})", args.bind)
        })?;

        let source_kind = SourceKind::from_uri(&args.source);

        Ok(Self {
            source: args.source,
            source_kind,
            width,
            height,
            fps: args.fps,
            service_url: args.service_url,
            send_interval: Duration::from_millis(args.send_interval_ms),
            style: OverlayStyle {
                thickness,
                font_size,
                color,
                max_label_chars,
                ..defaults
            },
            jpeg_quality: args.jpeg_quality as u8,
            bind,
            verbose: args.verbose,
        })
    }
}

impl ViewerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }
}

/// Parse `RRGGBB` or `RRGGBBAA`, with or without a leading `#`.
pub(crate) fn parse_color(hex: &str) -> Result<[u8; 4]> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if !matches!(digits.len(), 6 | 8) || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("--color must be RRGGBB or RRGGBBAA hex (got {hex})");
    }
    let channel = |index: usize| {
        u8::from_str_radix(&digits[index * 2..index * 2 + 2], 16)
            .map_err(|err| anyhow!("invalid colour channel in {hex}: {err}"))
    };
    let alpha = if digits.len() == 8 { channel(3)? } else { 255 };
    Ok([channel(0)?, channel(1)?, channel(2)?, alpha])
}
