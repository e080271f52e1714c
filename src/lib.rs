//! argus: fixed-cadence camera polling against a vision-language backend.
//!
//! Opens a camera source, captures one frame per tick, asks an inference
//! backend about it, and publishes every answer (or per-cycle error) to a
//! result sink. See [`poll::PollingLoop`] for the lifecycle.

pub mod backend;
pub mod capture;
pub mod config;
pub mod errors;
pub mod poll;
pub mod sink;

pub use backend::{Answer, InferenceBackend, MockBackend, VilaBackend};
pub use capture::{Frame, FrameSource, PixelFormat, SyntheticSource, V4l2Source};
pub use config::{BackendMode, LoopConfig};
pub use errors::{CameraError, ConfigError, InferenceError, SinkError};
pub use poll::{LoopError, LoopState, PollingLoop, StopHandle};
pub use sink::{ConsoleSink, CycleOutcome, CycleRecord, JsonlSink, MemorySink, ResultSink};
