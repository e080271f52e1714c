//! Real backend: one container run per query against a NanoLLM/VILA image.
//!
//! The frame is written as a JPEG into a scratch directory that gets
//! mounted into the container; the model's answer comes back on
//! stdout. Expect multi-second latency, dominated by model load on the
//! first call.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::launcher::{resolve_model_tag, ContainerLauncher, LaunchOutput};
use crate::backend::{Answer, InferenceBackend};
use crate::capture::{Frame, PixelFormat};
use crate::errors::InferenceError;

const GUEST_DATA_DIR: &str = "/data";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct VilaBackend {
    model: String,
    image: String,
    launcher: ContainerLauncher,
    scratch_dir: PathBuf,
    call_timeout: Duration,
    checked_runtime: bool,
}

impl VilaBackend {
    /// Resolve the model tag up front so an unknown model fails at
    /// construction, not on the first cycle.
    pub fn new(model: &str, launcher: ContainerLauncher) -> Result<Self, InferenceError> {
        let image = resolve_model_tag(model)?;
        let scratch_dir = std::env::temp_dir().join("argus-frames");
        std::fs::create_dir_all(&scratch_dir).map_err(|e| {
            InferenceError::ModelUnavailable(format!(
                "cannot create scratch dir {}: {e}",
                scratch_dir.display()
            ))
        })?;
        Ok(Self {
            model: model.to_string(),
            image,
            launcher,
            scratch_dir,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            checked_runtime: false,
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn encode_jpeg(&self, frame: &Frame) -> Result<PathBuf, InferenceError> {
        let rgb: Vec<u8> = match frame.meta.format {
            PixelFormat::Rgb24 => frame.data.to_vec(),
            PixelFormat::Bgr24 => frame
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        let img = image::RgbImage::from_raw(frame.meta.width, frame.meta.height, rgb)
            .ok_or_else(|| {
                InferenceError::InvalidResponse("frame buffer does not fit geometry".into())
            })?;

        let path = self
            .scratch_dir
            .join(format!("frame-{:08}.jpg", frame.meta.sequence));
        img.save_with_format(&path, image::ImageFormat::Jpeg)
            .map_err(|e| InferenceError::InvalidResponse(format!("jpeg encode: {e}")))?;
        Ok(path)
    }

    fn classify_failure(&self, output: &LaunchOutput) -> InferenceError {
        let stderr = output.stderr.to_lowercase();
        if stderr.contains("out of memory") || stderr.contains("cuda oom") {
            InferenceError::OutOfMemory(format!("{} on {}", self.image, self.model))
        } else if stderr.contains("loading")
            || stderr.contains("initializing")
            || stderr.contains("downloading")
        {
            InferenceError::ModelLoadError(format!("{} still initializing", self.model))
        } else if stderr.contains("cannot connect") || stderr.contains("daemon") {
            InferenceError::ModelUnavailable(format!(
                "container runtime rejected the run: {}",
                tail(&output.stderr)
            ))
        } else {
            InferenceError::InvalidResponse(format!(
                "exit status {:?}: {}",
                output.status,
                tail(&output.stderr)
            ))
        }
    }
}

/// Last non-empty line, for error messages that would otherwise carry a
/// whole progress log.
fn tail(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
}

/// The model's answer from stdout. Loader/progress chatter is separated
/// from the answer by a blank line, so everything after the last blank
/// line is kept; a multi-sentence answer survives intact.
fn extract_answer(stdout: &str) -> String {
    let trimmed = stdout.trim();
    let answer = trimmed
        .rsplit("\n\n")
        .next()
        .unwrap_or(trimmed);
    answer.trim().to_string()
}

#[async_trait]
impl InferenceBackend for VilaBackend {
    async fn query(&mut self, frame: &Frame, prompt: &str) -> Result<Answer, InferenceError> {
        let started = Instant::now();

        if !self.checked_runtime {
            if !self.launcher.is_available().await {
                return Err(InferenceError::ModelUnavailable(format!(
                    "container runtime {} not reachable",
                    self.launcher.runtime().display()
                )));
            }
            self.launcher
                .pull_if_needed(&self.image)
                .await
                .map_err(|e| {
                    InferenceError::ModelUnavailable(format!("pull {}: {e}", self.image))
                })?;
            self.checked_runtime = true;
        }

        let host_path = self.encode_jpeg(frame)?;
        let file_name = host_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let guest_path = format!("{GUEST_DATA_DIR}/{file_name}");

        let args = vec![
            "--model".to_string(),
            self.model.clone(),
            "--image".to_string(),
            guest_path,
            "--prompt".to_string(),
            prompt.to_string(),
        ];
        debug!("Querying {} via {}", self.model, self.image);

        let result = self
            .launcher
            .run(
                &self.image,
                &[(self.scratch_dir.clone(), PathBuf::from(GUEST_DATA_DIR))],
                &args,
                self.call_timeout,
            )
            .await;

        // The scratch frame is per-call; stale files are just disk noise.
        if let Err(e) = std::fs::remove_file(&host_path) {
            warn!("Could not remove scratch frame: {e}");
        }

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Most timeouts on the first calls are model load, which
                // heals; retry next tick.
                return Err(InferenceError::ModelLoadError(format!(
                    "{} call exceeded {:?}",
                    self.model, self.call_timeout
                )));
            }
            Err(e) => {
                return Err(InferenceError::ModelUnavailable(format!(
                    "failed to launch container: {e}"
                )));
            }
        };

        if !output.success() {
            return Err(self.classify_failure(&output));
        }

        let text = extract_answer(&output.stdout);
        if text.is_empty() {
            return Err(InferenceError::InvalidResponse(
                "model produced no output".into(),
            ));
        }

        Ok(Answer {
            text,
            latency: started.elapsed(),
            model: self.model.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> VilaBackend {
        VilaBackend::new("VILA-1.5-3B", ContainerLauncher::with_runtime("docker", false)).unwrap()
    }

    fn output(status: i32, stderr: &str) -> LaunchOutput {
        LaunchOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn unknown_model_fails_at_construction() {
        assert!(matches!(
            VilaBackend::new("not-a-model", ContainerLauncher::new()),
            Err(InferenceError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn oom_stderr_classifies_as_out_of_memory() {
        let b = backend();
        assert!(matches!(
            b.classify_failure(&output(1, "RuntimeError: CUDA out of memory")),
            InferenceError::OutOfMemory(_)
        ));
    }

    #[test]
    fn loading_stderr_classifies_as_model_load() {
        let b = backend();
        assert!(matches!(
            b.classify_failure(&output(1, "Loading checkpoint shards: 40%")),
            InferenceError::ModelLoadError(_)
        ));
    }

    #[test]
    fn daemon_stderr_classifies_as_unavailable() {
        let b = backend();
        assert!(matches!(
            b.classify_failure(&output(
                125,
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
            )),
            InferenceError::ModelUnavailable(_)
        ));
    }

    #[test]
    fn tail_picks_last_nonempty_line() {
        assert_eq!(tail("progress 1%\nprogress 99%\nA red chair.\n\n"), "A red chair.");
        assert_eq!(tail(""), "");
    }

    #[test]
    fn multi_line_answer_survives_extraction() {
        let stdout = "Loading checkpoint shards: 100%\n\n\
                      A red chair sits by the window.\nSunlight falls across the seat.\n";
        assert_eq!(
            extract_answer(stdout),
            "A red chair sits by the window.\nSunlight falls across the seat."
        );
    }

    #[test]
    fn answer_without_preamble_is_kept_whole() {
        assert_eq!(
            extract_answer("A dog. It is asleep.\n"),
            "A dog. It is asleep."
        );
        assert_eq!(extract_answer(""), "");
    }
}
