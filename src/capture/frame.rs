// Frame types delivered to the subscriber

use base64::Engine;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Bytes per pixel of every delivered frame (RGBA8888)
pub const BYTES_PER_PIXEL: usize = 4;

/// A tightly packed RGBA frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Packed RGBA8888 pixels, `width * height * 4` bytes
    pub bytes: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Position of the frame in acquisition order
    pub sequence: u64,
    /// When the frame was copied out of the platform buffer
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Total size in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer matches the frame dimensions
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.bytes.len() == self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Reinterprets the frame as an image, e.g. to composite overlays onto it
    pub fn into_image(self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.bytes)
    }
}

/// Size metadata attached to a frame payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
}

/// Wire form of a frame sent to a webview or other remote subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Base64-encoded packed RGBA8888 bytes
    pub bytes: String,
    pub width: u32,
    pub height: u32,
    pub metadata: FrameMetadata,
    pub frame_number: u64,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl From<&Frame> for FramePayload {
    fn from(frame: &Frame) -> Self {
        Self {
            bytes: base64::engine::general_purpose::STANDARD.encode(&frame.bytes),
            width: frame.width,
            height: frame.height,
            metadata: FrameMetadata {
                width: frame.width,
                height: frame.height,
            },
            frame_number: frame.sequence,
            timestamp: frame.captured_at.timestamp_millis(),
        }
    }
}

impl FramePayload {
    /// Decodes the pixel bytes
    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.bytes)
    }
}

/// Receiver of captured frames
///
/// Frames arrive on the presentation context. `end_of_stream` normally does
/// too, but runs on the thread that stopped the session when the presentation
/// context no longer accepts tasks. It is called at most once per session and
/// no frame follows it.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: Frame);

    fn end_of_stream(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            bytes: vec![7; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
            sequence: 3,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_frame_validity() {
        assert!(frame(4, 2).is_valid());

        let mut short = frame(4, 2);
        short.bytes.pop();
        assert!(!short.is_valid());
    }

    #[test]
    fn test_payload_shape() {
        let frame = frame(2, 1);
        let payload = FramePayload::from(&frame);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["width"], 2);
        assert_eq!(json["metadata"]["height"], 1);
        assert_eq!(json["frameNumber"], 3);
        assert_eq!(payload.decode_bytes().unwrap(), frame.bytes);
    }

    #[test]
    fn test_into_image() {
        let image = frame(3, 2).into_image().unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [7, 7, 7, 7]);
    }
}
