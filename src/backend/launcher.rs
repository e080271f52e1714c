//! Opaque collaborators for the real backend: the container runtime and the
//! model-name → image-tag lookup. Neither is reimplemented; the launcher is
//! a black box that returns exit status and captured output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::InferenceError;

/// Map a logical model name to the container image that serves it.
///
/// The table covers the VILA-1.5 family shipped in the NanoLLM images;
/// anything else is an error up front rather than a failed pull mid-run.
pub fn resolve_model_tag(name: &str) -> Result<String, InferenceError> {
    let image = match name {
        "VILA-1.5-3B" | "VILA1.5-3b" => "dustynv/nano_llm:vila-1.5-3b-r36.2.0",
        "VILA-1.5-8B" | "VILA1.5-8b" => "dustynv/nano_llm:vila-1.5-8b-r36.2.0",
        "VILA-1.5-13B" | "VILA1.5-13b" => "dustynv/nano_llm:vila-1.5-13b-r36.2.0",
        _ => {
            return Err(InferenceError::ModelUnavailable(format!(
                "no image known for model {name:?}"
            )))
        }
    };
    Ok(image.to_string())
}

/// Outcome of one launched container run.
#[derive(Debug)]
pub struct LaunchOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Thin wrapper over the container runtime binary.
pub struct ContainerLauncher {
    runtime: String,
    use_gpu: bool,
}

impl ContainerLauncher {
    pub fn new() -> Self {
        Self {
            runtime: "docker".to_string(),
            use_gpu: true,
        }
    }

    pub fn with_runtime(runtime: &str, use_gpu: bool) -> Self {
        Self {
            runtime: runtime.to_string(),
            use_gpu,
        }
    }

    /// Is the runtime reachable at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.runtime)
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Pull the image unless it is already present locally.
    pub async fn pull_if_needed(&self, image: &str) -> std::io::Result<()> {
        let present = Command::new(&self.runtime)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if present {
            return Ok(());
        }

        info!("Pulling {image}...");
        let status = Command::new(&self.runtime)
            .args(["pull", image])
            .stdout(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(std::io::Error::other(format!(
                "pull of {image} exited with {status}"
            )));
        }
        Ok(())
    }

    /// Run one container to completion with the given volume mounts and
    /// arguments, bounded by `timeout`.
    pub async fn run(
        &self,
        image: &str,
        mounts: &[(PathBuf, PathBuf)],
        args: &[String],
        timeout: Duration,
    ) -> std::io::Result<LaunchOutput> {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run").arg("--rm");
        if self.use_gpu {
            cmd.args(["--runtime", "nvidia"]);
        }
        for (host, guest) in mounts {
            cmd.arg("-v")
                .arg(format!("{}:{}", host.display(), guest.display()));
        }
        cmd.arg(image).args(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Launching: {} run ... {}", self.runtime, image);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("container run exceeded {timeout:?}"),
                )
            })??;

        let out = LaunchOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        info!(
            "Container exited with status {:?} ({} bytes stdout)",
            out.status,
            out.stdout.len()
        );
        Ok(out)
    }

    pub fn runtime(&self) -> &Path {
        Path::new(&self.runtime)
    }
}

impl Default for ContainerLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve() {
        assert!(resolve_model_tag("VILA-1.5-3B").unwrap().contains("3b"));
        assert!(resolve_model_tag("VILA-1.5-13B").unwrap().contains("13b"));
        // Hyphen-less spelling used by the upstream scripts.
        assert!(resolve_model_tag("VILA1.5-8b").unwrap().contains("8b"));
    }

    #[test]
    fn unknown_model_is_unavailable() {
        assert!(matches!(
            resolve_model_tag("GPT-9000"),
            Err(InferenceError::ModelUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_runtime_reports_unavailable() {
        let launcher = ContainerLauncher::with_runtime("/nonexistent/docker", false);
        assert!(!launcher.is_available().await);
    }
}
