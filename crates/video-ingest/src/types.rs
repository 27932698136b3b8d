use std::fmt;

use thiserror::Error;

/// Channel layout of a captured frame, eight bits per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }

    /// Expand one pixel of this format into RGBA. Formats without alpha are opaque.
    pub fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
            PixelFormat::Bgr8 => [px[2], px[1], px[0], 255],
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Bgra8 => "bgra8",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero (got {width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("stride {stride} is narrower than a {width}px {format} row")]
    StrideTooSmall {
        stride: usize,
        width: u32,
        format: PixelFormat,
    },
    #[error("frame buffer holds {actual} bytes, expected at least {expected}")]
    BufferTooShort { actual: usize, expected: usize },
}

/// Raw frame captured from a video source.
///
/// Rows are stored top-down: row 0 is the top of the image. The frame is
/// immutable once built; consumers read it through [`VideoFrame::row`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
    timestamp_ms: i64,
}

impl VideoFrame {
    /// Build a tightly packed frame (stride equals `width * bytes_per_pixel`).
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<Self, FrameError> {
        let stride = width as usize * format.bytes_per_pixel();
        Self::with_stride(width, height, stride, format, data, timestamp_ms)
    }

    pub fn with_stride(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<Self, FrameError> {
        let frame = Self {
            width,
            height,
            stride,
            format,
            data,
            timestamp_ms,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        let row_bytes = self.width as usize * self.format.bytes_per_pixel();
        if self.stride < row_bytes {
            return Err(FrameError::StrideTooSmall {
                stride: self.stride,
                width: self.width,
                format: self.format,
            });
        }
        // The last row only needs its pixel bytes, not the trailing padding.
        let expected = self.stride * (self.height as usize - 1) + row_bytes;
        if self.data.len() < expected {
            return Err(FrameError::BufferTooShort {
                actual: self.data.len(),
                expected,
            });
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel bytes of row `y` (top-down), without stride padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        self.data.get(start..start + len)
    }

    /// Tightly packed top-down RGBA copy of the frame.
    pub fn to_rgba(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let mut output = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            if let Some(row) = self.row(y) {
                for px in row.chunks_exact(bpp) {
                    output.extend_from_slice(&self.format.to_rgba(px));
                }
            }
        }
        output
    }
}

/// Lifecycle notifications emitted by a capture source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    Started { width: u32, height: u32 },
    Stopped,
}

/// Everything a capture thread can hand to its consumer.
#[derive(Debug)]
pub enum CaptureEvent {
    Signal(StreamSignal),
    Frame(VideoFrame),
    Error(CaptureError),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("capture read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_sized_frames() {
        let err = VideoFrame::new(0, 4, PixelFormat::Rgba8, Vec::new(), 0).unwrap_err();
        assert_eq!(
            err,
            FrameError::ZeroDimension {
                width: 0,
                height: 4
            }
        );
    }

    #[test]
    fn rejects_short_buffers_and_narrow_strides() {
        let short = VideoFrame::new(2, 2, PixelFormat::Bgr8, vec![0; 11], 0).unwrap_err();
        assert_eq!(
            short,
            FrameError::BufferTooShort {
                actual: 11,
                expected: 12
            }
        );

        let narrow =
            VideoFrame::with_stride(4, 1, 8, PixelFormat::Rgba8, vec![0; 16], 0).unwrap_err();
        assert!(matches!(narrow, FrameError::StrideTooSmall { stride: 8, .. }));
    }

    #[test]
    fn rows_skip_stride_padding() {
        // 2x2 RGB frame with two padding bytes per row; the last row is unpadded.
        let data = vec![1, 2, 3, 4, 5, 6, 99, 99, 7, 8, 9, 10, 11, 12];
        let frame = VideoFrame::with_stride(2, 2, 8, PixelFormat::Rgb8, data, 0).unwrap();
        assert_eq!(frame.row(0), Some(&[1, 2, 3, 4, 5, 6][..]));
        assert_eq!(frame.row(1), Some(&[7, 8, 9, 10, 11, 12][..]));
        assert_eq!(frame.row(2), None);
    }

    #[test]
    fn converts_bgr_to_opaque_rgba() {
        let frame = VideoFrame::new(1, 1, PixelFormat::Bgr8, vec![10, 20, 30], 0).unwrap();
        assert_eq!(frame.to_rgba(), vec![30, 20, 10, 255]);

        let frame = VideoFrame::new(1, 1, PixelFormat::Bgra8, vec![10, 20, 30, 40], 0).unwrap();
        assert_eq!(frame.to_rgba(), vec![30, 20, 10, 40]);
    }
}
