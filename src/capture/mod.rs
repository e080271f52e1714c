pub mod convert;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst;
pub mod synthetic;
pub mod v4l2;

pub use frame::Frame;
pub use frame::FrameMetadata;
pub use frame::PixelFormat;
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

use async_trait::async_trait;

use crate::errors::CameraError;

/// One camera device behind whatever acquisition pipeline fits the host.
///
/// The device is an exclusive resource for the open/close lifetime: another
/// holder surfaces as `DeviceBusy` at `open()`, never as a hang. `capture()`
/// is bounded by a timeout and hands out the newest frame only; sources drop
/// backlog rather than queue it.
#[async_trait]
pub trait FrameSource: Send {
    /// Acquire the device. Logs which acquisition path was chosen when a
    /// fallback is taken.
    async fn open(&mut self) -> Result<(), CameraError>;

    /// Block until one frame is available or the capture timeout elapses.
    async fn capture(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    /// Device identifier for logs and sink records.
    fn path(&self) -> &str;
}
