//! Generated test-pattern source for offline runs and infrastructure tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::errors::CameraError;

/// Produces solid-gray RGB frames without touching any hardware.
///
/// The gray level steps through a ramp by sequence number, so a live run
/// exercises every mock-backend luminance bucket; `with_fixed_level` pins
/// it for determinism checks.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: u32,
    fixed_level: Option<u8>,
    sequence: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            fixed_level: None,
            sequence: 0,
            open: false,
        }
    }

    pub fn with_fixed_level(mut self, level: u8) -> Self {
        self.fixed_level = Some(level);
        self
    }

    fn level_for(&self, sequence: u64) -> u8 {
        self.fixed_level
            .unwrap_or_else(|| ((sequence * 32) % 256) as u8)
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn open(&mut self) -> Result<(), CameraError> {
        info!(
            "Synthetic source open: {}x{} @ {}fps",
            self.width, self.height, self.fps
        );
        self.open = true;
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::BackendUnavailable(
                "synthetic source not open".into(),
            ));
        }

        // Pace like a real sensor would.
        tokio::time::sleep(Duration::from_secs(1) / self.fps.max(1)).await;

        self.sequence += 1;
        let level = self.level_for(self.sequence);
        let data = vec![level; self.width as usize * self.height as usize * 3];

        Frame::new(
            Bytes::from(data),
            FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride: self.width,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            },
        )
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn path(&self) -> &str {
        "synthetic"
    }
}
