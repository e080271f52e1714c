//! Deterministic offline backend for infrastructure tests.
//!
//! Computes the mean luminance of the frame, buckets it, and returns a
//! canned sentence referencing the bucket and the prompt. Same frame plus
//! same prompt always yields the same answer.

use async_trait::async_trait;
use std::time::Instant;

use crate::backend::{Answer, InferenceBackend};
use crate::capture::{Frame, PixelFormat};
use crate::errors::InferenceError;

pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        Self
    }

    /// Rec.601 mean luminance over the whole frame, 0..=255.
    fn mean_luminance(frame: &Frame) -> Result<f64, InferenceError> {
        let bpp = frame.meta.format.bytes_per_pixel();
        let pixels = frame.data.len() / bpp;
        if pixels == 0 || frame.data.len() % bpp != 0 {
            return Err(InferenceError::InvalidResponse(format!(
                "frame buffer of {} bytes is not whole {:?} pixels",
                frame.data.len(),
                frame.meta.format
            )));
        }

        let mut sum = 0.0f64;
        for px in frame.data.chunks_exact(bpp) {
            let (r, g, b) = match frame.meta.format {
                PixelFormat::Rgb24 => (px[0], px[1], px[2]),
                PixelFormat::Bgr24 => (px[2], px[1], px[0]),
            };
            sum += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        }
        Ok(sum / pixels as f64)
    }

    fn bucket(luminance: f64) -> &'static str {
        match luminance {
            l if l < 40.0 => "very dark",
            l if l < 90.0 => "dim",
            l if l < 150.0 => "moderately lit",
            l if l < 210.0 => "bright",
            _ => "washed out",
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn query(&mut self, frame: &Frame, prompt: &str) -> Result<Answer, InferenceError> {
        let started = Instant::now();
        let luminance = Self::mean_luminance(frame)?;
        let text = format!(
            "[mock] The scene is {} (mean luminance {:.0}/255); asked: \"{}\"",
            Self::bucket(luminance),
            luminance,
            prompt
        );
        Ok(Answer {
            text,
            latency: started.elapsed(),
            model: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use bytes::Bytes;

    fn gray_frame(level: u8) -> Frame {
        Frame::new(
            Bytes::from(vec![level; 8 * 8 * 3]),
            FrameMetadata {
                sequence: 1,
                width: 8,
                height: 8,
                stride: 8,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn same_frame_same_prompt_same_text() {
        let mut backend = MockBackend::new();
        let frame = gray_frame(120);
        let a = backend.query(&frame, "what is this?").await.unwrap();
        let b = backend.query(&frame, "what is this?").await.unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.model, "mock");
    }

    #[tokio::test]
    async fn buckets_follow_luminance() {
        let mut backend = MockBackend::new();
        let dark = backend.query(&gray_frame(10), "p").await.unwrap();
        assert!(dark.text.contains("very dark"));
        let bright = backend.query(&gray_frame(180), "p").await.unwrap();
        assert!(bright.text.contains("bright"));
        let blown = backend.query(&gray_frame(250), "p").await.unwrap();
        assert!(blown.text.contains("washed out"));
    }

    #[tokio::test]
    async fn answer_quotes_the_prompt() {
        let mut backend = MockBackend::new();
        let answer = backend
            .query(&gray_frame(100), "Describe in one sentence.")
            .await
            .unwrap();
        assert!(answer.text.contains("Describe in one sentence."));
    }

    #[test]
    fn bgr_weights_swap_channels() {
        // Pure red in BGR order: byte triple (0, 0, 255).
        let frame = Frame::new(
            Bytes::from([0u8, 0, 255].repeat(4)),
            FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                stride: 2,
                format: PixelFormat::Bgr24,
                device_timestamp: None,
            },
        )
        .unwrap();
        let lum = MockBackend::mean_luminance(&frame).unwrap();
        assert!((lum - 0.299 * 255.0).abs() < 1e-6);
    }
}
