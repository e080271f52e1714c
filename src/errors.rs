//! Error taxonomy for the polling agent.
//!
//! Split by subsystem so the loop can classify a failure as transient
//! (skip the cycle) or fatal (end the run) without string matching.

use thiserror::Error;

/// Camera acquisition failures.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),

    #[error("camera device busy: {0}")]
    DeviceBusy(String),

    #[error("capture backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("no frame within {0:?}")]
    CaptureTimeout(std::time::Duration),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl CameraError {
    /// Only a capture timeout may be retried within a running loop;
    /// every other camera fault needs operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::CaptureTimeout(_))
    }
}

/// Inference backend failures.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("model runtime not reachable: {0}")]
    ModelUnavailable(String),

    #[error("model still loading: {0}")]
    ModelLoadError(String),

    #[error("model ran out of memory: {0}")]
    OutOfMemory(String),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    /// A still-initializing model heals on its own; retry next tick.
    /// OOM and an unreachable runtime do not.
    pub fn is_transient(&self) -> bool {
        matches!(self, InferenceError::ModelLoadError(_))
    }
}

/// Configuration rejection, raised at construction and never at run time.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid failure threshold: {0}")]
    InvalidThreshold(String),

    #[error("prompt must not be empty")]
    MissingPrompt,
}

/// Sink-side failure. Swallowed and counted by the loop, never propagated.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink encode failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn capture_timeout_is_the_only_transient_camera_error() {
        assert!(CameraError::CaptureTimeout(Duration::from_millis(150)).is_transient());
        assert!(!CameraError::DeviceNotFound("/dev/video0".into()).is_transient());
        assert!(!CameraError::DeviceBusy("/dev/video0".into()).is_transient());
        assert!(!CameraError::BackendUnavailable("no pipeline".into()).is_transient());
        assert!(!CameraError::MalformedFrame("short buffer".into()).is_transient());
    }

    #[test]
    fn model_load_is_the_only_transient_inference_error() {
        assert!(InferenceError::ModelLoadError("warming up".into()).is_transient());
        assert!(!InferenceError::OutOfMemory("cuda".into()).is_transient());
        assert!(!InferenceError::ModelUnavailable("no docker".into()).is_transient());
        assert!(!InferenceError::InvalidResponse("empty".into()).is_transient());
    }
}
