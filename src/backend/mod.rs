pub mod launcher;
pub mod mock;
pub mod vila;

pub use mock::MockBackend;
pub use vila::VilaBackend;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::capture::Frame;
use crate::errors::InferenceError;

/// Text result of one vision query, with the wall-clock latency measured
/// around the call.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub latency: Duration,
    pub model: String,
}

/// Answers "what does this frame look like, given this prompt".
///
/// The frame is borrowed immutably; a backend never mutates its input.
#[async_trait]
pub trait InferenceBackend: Send {
    async fn query(&mut self, frame: &Frame, prompt: &str) -> Result<Answer, InferenceError>;

    /// Backend identifier for logs and sink records.
    fn name(&self) -> &str;
}
