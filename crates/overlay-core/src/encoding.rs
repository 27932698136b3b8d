//! Frame encoders used for the detection request and the preview.

use image::{DynamicImage, ImageBuffer, Rgba, codecs::jpeg::JpegEncoder as ImageJpegEncoder};
use video_ingest::VideoFrame;

use crate::{channel::ChannelError, compositor::OverlayBuffer};

/// Turns a captured frame into the bytes sent to the detection service.
pub trait FrameEncoder {
    fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>, ChannelError>;
}

#[derive(Clone, Copy, Debug)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// Quality is clamped to the 1..=100 range the codec accepts.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a tightly packed, top-down RGBA image.
    pub fn encode_rgba(
        &self,
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    ) -> Result<Vec<u8>, ChannelError> {
        let image = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_vec(width, height, rgba)
            .ok_or_else(|| {
                ChannelError::Encode(format!("buffer does not hold a {width}x{height} RGBA image"))
            })?;
        let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
        let mut buffer = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(&rgb)
            .map_err(|err| ChannelError::Encode(err.to_string()))?;
        Ok(buffer)
    }

    /// Encode the composited overlay in image order.
    pub fn encode_overlay(&self, overlay: &OverlayBuffer) -> Result<Vec<u8>, ChannelError> {
        self.encode_rgba(overlay.width(), overlay.height(), overlay.to_top_down_rgba())
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>, ChannelError> {
        self.encode_rgba(frame.width(), frame.height(), frame.to_rgba())
    }
}
