//! Pixel-level overlay rendering.
//!
//! Detection boxes arrive in image space (origin top-left, y down) while the
//! overlay surface is stored bottom-up (origin bottom-left, y up), the layout
//! GPU texture uploads expect. [`flip_y`] is the one place the two are
//! reconciled; every pixel write, including the base image copy, goes through
//! it.

use std::ops::Range;

use video_ingest::VideoFrame;

use crate::{
    detection::{BoundingBox, Detection},
    glyph::{GLYPH_COLUMNS, GLYPH_ROWS, glyph_for},
};

const CHANNELS: usize = 4;

/// Map an image-space row to a surface row.
pub fn flip_y(height: u32, y: i32) -> i32 {
    height as i32 - 1 - y
}

/// Drawing parameters for boxes and labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    /// Border width in pixels.
    pub thickness: u32,
    /// Label glyph height in pixels; glyph cells are half as wide.
    pub font_size: u32,
    /// RGBA colour shared by borders and label text.
    pub color: [u8; 4],
    /// Extra pixels around the label text, split evenly on both sides.
    pub label_padding: u32,
    /// Opacity of the black label background.
    pub label_alpha: u8,
    /// Labels longer than this are shortened with `...`.
    pub max_label_chars: usize,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            thickness: 2,
            font_size: 14,
            color: [0, 255, 0, 255],
            label_padding: 4,
            label_alpha: 179,
            max_label_chars: 20,
        }
    }
}

impl OverlayStyle {
    pub fn char_width(&self) -> u32 {
        self.font_size / 2
    }

    fn label_size(&self, chars: usize) -> (i64, i64) {
        let width = chars as i64 * i64::from(self.char_width()) + i64::from(self.label_padding);
        let height = i64::from(self.font_size) + i64::from(self.label_padding);
        (width, height)
    }

    fn glyph_cell(&self) -> (i64, i64) {
        let cell_w = (self.char_width() / GLYPH_COLUMNS).max(1);
        let cell_h = (self.font_size / GLYPH_ROWS).max(1);
        (i64::from(cell_w), i64::from(cell_h))
    }
}

/// RGBA8 surface with bottom-up rows, sized to the latest source frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl OverlayBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw bottom-up RGBA bytes, ready for a texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at surface coordinates (row 0 is the bottom row).
    pub fn pixel(&self, x: u32, row: u32) -> Option<[u8; 4]> {
        if x >= self.width || row >= self.height {
            return None;
        }
        let idx = self.offset(x as usize, row as usize);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[idx..idx + CHANNELS]);
        Some(px)
    }

    /// Pixel at image coordinates (row 0 is the top row).
    pub fn image_pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        let row = flip_y(self.height, y);
        if x < 0 || row < 0 {
            return None;
        }
        self.pixel(x as u32, row as u32)
    }

    /// Tightly packed top-down RGBA copy, for encoders expecting image order.
    pub fn to_top_down_rgba(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * CHANNELS;
        let mut output = Vec::with_capacity(self.pixels.len());
        for y in 0..self.height as i32 {
            let start = flip_y(self.height, y) as usize * row_bytes;
            output.extend_from_slice(&self.pixels[start..start + row_bytes]);
        }
        output
    }

    fn offset(&self, x: usize, row: usize) -> usize {
        (row * self.width as usize + x) * CHANNELS
    }

    /// Clip an image-space span to `0..limit`.
    fn clip(span: Range<i64>, limit: u32) -> Range<i64> {
        let limit = i64::from(limit);
        let start = span.start.clamp(0, limit);
        start..span.end.clamp(start, limit)
    }

    /// Apply `paint` to every pixel of the image-space rectangle `x` × `y`
    /// that lies on the surface. Only the visible part is visited.
    fn for_each_in(&mut self, x: Range<i64>, y: Range<i64>, mut paint: impl FnMut(&mut [u8])) {
        let columns = Self::clip(x, self.width);
        for image_row in Self::clip(y, self.height) {
            let row = flip_y(self.height, image_row as i32) as usize;
            let start = self.offset(columns.start as usize, row);
            let end = self.offset(columns.end as usize, row);
            self.pixels[start..end]
                .chunks_exact_mut(CHANNELS)
                .for_each(&mut paint);
        }
    }

    fn fill(&mut self, x: Range<i64>, y: Range<i64>, color: [u8; 4]) {
        self.for_each_in(x, y, |px| px.copy_from_slice(&color));
    }

    /// Darken towards black by `alpha`, leaving the alpha channel alone.
    fn shade(&mut self, x: Range<i64>, y: Range<i64>, alpha: u8) {
        let keep = 255 - alpha as u16;
        self.for_each_in(x, y, |px| {
            for channel in &mut px[..3] {
                *channel = (*channel as u16 * keep / 255) as u8;
            }
        });
    }

    /// Copy `frame` in, converting its pixel format to RGBA. Rows go through
    /// the canonical flip like every other write.
    fn copy_from(&mut self, frame: &VideoFrame) {
        let format = frame.format();
        let bpp = format.bytes_per_pixel();
        let row_bytes = self.width as usize * CHANNELS;
        for y in 0..frame.height() {
            let Some(src) = frame.row(y) else { continue };
            let row = flip_y(self.height, y as i32) as usize;
            let dst = &mut self.pixels[row * row_bytes..(row + 1) * row_bytes];
            for (out, px) in dst.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(bpp)) {
                out.copy_from_slice(&format.to_rgba(px));
            }
        }
    }
}

/// Per-call summary of what was drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComposeOutcome {
    /// The overlay surface was (re)allocated for new dimensions.
    pub resized: bool,
    pub boxes_drawn: usize,
    pub labels_drawn: usize,
}

/// Owns the overlay surface and redraws it from scratch on every call.
pub struct Compositor {
    style: OverlayStyle,
    buffer: Option<OverlayBuffer>,
}

impl Compositor {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            buffer: None,
        }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn buffer(&self) -> Option<&OverlayBuffer> {
        self.buffer.as_ref()
    }

    /// Render `detections` over a fresh copy of `frame`.
    pub fn compose(&mut self, frame: &VideoFrame, detections: &[Detection]) -> ComposeOutcome {
        let mut outcome = ComposeOutcome::default();
        let buffer = match self.buffer.take() {
            Some(buffer) if buffer.width == frame.width() && buffer.height == frame.height() => {
                buffer
            }
            _ => {
                outcome.resized = true;
                OverlayBuffer::new(frame.width(), frame.height())
            }
        };
        let buffer = self.buffer.insert(buffer);
        buffer.copy_from(frame);

        for detection in detections {
            let Some(bounds) = detection.bounds() else {
                continue;
            };
            draw_border(buffer, bounds, self.style.thickness, self.style.color);
            outcome.boxes_drawn += 1;

            if let Some(text) = detection.label(self.style.max_label_chars) {
                draw_label(buffer, &self.style, bounds, &text);
                outcome.labels_drawn += 1;
            }
        }
        outcome
    }
}

/// Solid border of `thickness` pixels drawn inward from the box edges.
///
/// Each band is the union of the per-offset edges for `t` in
/// `0..thickness`; vertical bands span `y1..=y2` so the corners close.
fn draw_border(buffer: &mut OverlayBuffer, bounds: BoundingBox, thickness: u32, color: [u8; 4]) {
    let (x1, y1) = (i64::from(bounds.x1), i64::from(bounds.y1));
    let (x2, y2) = (i64::from(bounds.x2), i64::from(bounds.y2));
    let t = i64::from(thickness);

    buffer.fill(x1..x2, y1..y1 + t, color);
    buffer.fill(x1..x2, y2 - t + 1..y2 + 1, color);
    buffer.fill(x1..x1 + t, y1..y2 + 1, color);
    buffer.fill(x2 - t + 1..x2 + 1, y1..y2 + 1, color);
}

fn draw_label(buffer: &mut OverlayBuffer, style: &OverlayStyle, bounds: BoundingBox, text: &str) {
    let chars = text.chars().count();
    let (label_w, label_h) = style.label_size(chars);
    let left = i64::from(bounds.x1);
    let top = i64::from(bounds.y1) - label_h;

    buffer.shade(left..left + label_w, top..top + label_h, style.label_alpha);

    let inset = i64::from(style.label_padding / 2);
    let (cell_w, cell_h) = style.glyph_cell();
    let char_w = i64::from(style.char_width());
    let origin_y = top + inset;
    for (index, ch) in text.chars().enumerate() {
        let origin_x = left + inset + index as i64 * char_w;
        if origin_x >= i64::from(buffer.width) {
            break;
        }
        let glyph = glyph_for(ch);
        for row in 0..GLYPH_ROWS {
            for col in 0..GLYPH_COLUMNS {
                if glyph.is_set(col, row) {
                    let x = origin_x + i64::from(col) * cell_w;
                    let y = origin_y + i64::from(row) * cell_h;
                    buffer.fill(x..x + cell_w, y..y + cell_h, style.color);
                }
            }
        }
    }
}
