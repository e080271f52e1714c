use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::CameraError;

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Delivered pixel formats. Sources convert whatever the wire carries
/// (MJPEG, YUYV) into one of these before a Frame is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }
}

impl Frame {
    /// Construct a frame, rejecting buffers that do not match the declared
    /// geometry. A short or oversized buffer is a hard error, never a
    /// silent truncation.
    pub fn new(data: Bytes, meta: FrameMetadata) -> Result<Self, CameraError> {
        let expected =
            meta.width as usize * meta.height as usize * meta.format.bytes_per_pixel();
        if data.len() != expected {
            return Err(CameraError::MalformedFrame(format!(
                "{}x{} {:?} expects {} bytes, got {}",
                meta.width,
                meta.height,
                meta.format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32) -> FrameMetadata {
        FrameMetadata {
            sequence: 1,
            width,
            height,
            stride: width,
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        }
    }

    #[test]
    fn accepts_exactly_sized_buffer() {
        let frame = Frame::new(Bytes::from(vec![0u8; 4 * 2 * 3]), meta(4, 2)).unwrap();
        assert_eq!(frame.meta.width, 4);
        assert_eq!(frame.data.len(), 24);
    }

    #[test]
    fn rejects_short_buffer() {
        let err = Frame::new(Bytes::from(vec![0u8; 10]), meta(4, 2)).unwrap_err();
        assert!(matches!(err, CameraError::MalformedFrame(_)));
    }

    #[test]
    fn rejects_oversized_buffer() {
        let err = Frame::new(Bytes::from(vec![0u8; 100]), meta(4, 2)).unwrap_err();
        assert!(matches!(err, CameraError::MalformedFrame(_)));
    }
}
