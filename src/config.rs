//! Immutable run configuration.
//!
//! Built once at startup (file defaults, then CLI overrides), validated
//! before any resource is touched, and never mutated during a run.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_PROMPT: &str = "What do you see? Describe in one sentence.";
pub const DEFAULT_MODEL: &str = "VILA-1.5-3B";

/// Which inference backend answers the queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Deterministic offline luminance mock.
    Mock,
    /// Containerized VILA model.
    Real,
}

/// Configuration snapshot for one polling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Camera device path; empty means auto-detect.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Seconds between cycle starts. Strictly positive.
    pub interval_secs: f64,
    pub prompt: String,
    pub model: String,
    pub backend: BackendMode,
    /// Total run bound in seconds; 0 runs until stopped.
    pub duration_secs: f64,
    /// Consecutive transient failures tolerated before the run errors out.
    pub max_consecutive_transient: u32,
    /// Prefer the GStreamer hardware path when compiled in.
    pub use_gstreamer: bool,
    /// Save each answered cycle's frame as a JPEG here.
    pub snapshot_dir: Option<PathBuf>,
    /// Append one JSON record per cycle here.
    pub record_file: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            interval_secs: 2.0,
            prompt: DEFAULT_PROMPT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            backend: BackendMode::Real,
            duration_secs: 0.0,
            max_consecutive_transient: 5,
            use_gstreamer: true,
            snapshot_dir: None,
            record_file: None,
        }
    }
}

impl LoopConfig {
    /// Layered load: built-in defaults, then an optional TOML file.
    /// CLI overrides are applied by the caller on top.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("argus").required(false)),
        };
        builder.build()?.try_deserialize()
    }

    /// Reject bad values before anything is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            return Err(ConfigError::InvalidInterval(format!(
                "interval must be > 0, got {}",
                self.interval_secs
            )));
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(ConfigError::InvalidDuration(format!(
                "duration must be >= 0, got {}",
                self.duration_secs
            )));
        }
        if self.max_consecutive_transient == 0 {
            return Err(ConfigError::InvalidThreshold(
                "transient-failure threshold must be >= 1".into(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidResolution(format!(
                "{}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(ConfigError::InvalidResolution("0 fps".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(ConfigError::MissingPrompt);
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    /// None when the run is unbounded.
    pub fn duration(&self) -> Option<Duration> {
        if self.duration_secs > 0.0 {
            Some(Duration::from_secs_f64(self.duration_secs))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        LoopConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = LoopConfig {
            interval_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn negative_interval_is_rejected() {
        let config = LoopConfig {
            interval_secs: -1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let config = LoopConfig {
            prompt: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingPrompt)));
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let config = LoopConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidResolution(_))
        ));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let config = LoopConfig {
            duration_secs: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn zero_transient_threshold_is_rejected() {
        let config = LoopConfig {
            max_consecutive_transient: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn zero_duration_means_unbounded() {
        let config = LoopConfig::default();
        assert!(config.duration().is_none());

        let bounded = LoopConfig {
            duration_secs: 3.0,
            ..Default::default()
        };
        assert_eq!(bounded.duration(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "interval_secs = 0.5\nmodel = \"VILA-1.5-8B\"").unwrap();

        let config = LoopConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.interval_secs, 0.5);
        assert_eq!(config.model, "VILA-1.5-8B");
        // Untouched keys keep their defaults.
        assert_eq!(config.width, 1280);
        assert_eq!(config.prompt, DEFAULT_PROMPT);
    }
}
