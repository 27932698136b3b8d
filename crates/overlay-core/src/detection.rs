//! Detection results as produced by the remote service, and their wire decoding.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelError;

/// Box corners in image space: origin top-left, y increasing downward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Signed extent; widened so extreme corners cannot overflow.
    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }
}

/// One detected code.
///
/// `confidence` is carried for display and logging only; nothing filters on it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub bbox: Option<Vec<i32>>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub decoded: Option<String>,
}

impl Detection {
    /// Corner box, or `None` when the entry carries anything but four coordinates.
    pub fn bounds(&self) -> Option<BoundingBox> {
        match self.bbox.as_deref() {
            Some(&[x1, y1, x2, y2]) => Some(BoundingBox { x1, y1, x2, y2 }),
            _ => None,
        }
    }

    /// Text to print above the box: decoded content first, raw detector text
    /// second. Longer labels are cut to `max_chars` characters plus `...`.
    pub fn label(&self, max_chars: usize) -> Option<String> {
        let text = self
            .decoded
            .as_deref()
            .filter(|text| !text.is_empty())
            .or_else(|| Some(self.data.as_str()).filter(|text| !text.is_empty()))?;

        if text.chars().count() > max_chars {
            let mut short: String = text.chars().take(max_chars).collect();
            short.push_str("...");
            Some(short)
        } else {
            Some(text.to_string())
        }
    }
}

/// Result set of one completed detection request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decode one text message from the detection service.
///
/// Unparseable payloads and payloads carrying a non-empty `error` are both
/// errors; an empty `error` string is ignored.
pub fn decode_response(text: &str) -> Result<DetectionBatch, ChannelError> {
    let mut batch: DetectionBatch =
        serde_json::from_str(text).map_err(|err| ChannelError::Decode(err.to_string()))?;

    if let Some(message) = batch.error.take() {
        if !message.is_empty() {
            return Err(ChannelError::Service(message));
        }
    }
    if batch.count == 0 {
        batch.count = batch.detections.len();
    }
    Ok(batch)
}
