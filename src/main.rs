//! argus CLI: poll a camera on a fixed cadence and ask a VLM what it sees.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use argus::backend::launcher::ContainerLauncher;
use argus::capture::v4l2;
use argus::sink::{ConsoleSink, JsonlSink, MultiSink, ResultSink, SnapshotSink};
use argus::{
    BackendMode, FrameSource, InferenceBackend, LoopConfig, MockBackend, PollingLoop,
    SyntheticSource, V4l2Source, VilaBackend,
};

#[derive(Parser, Debug)]
#[command(name = "argus", version, about = "Camera polling agent for vision-language queries")]
struct Cli {
    /// Camera device path; "auto" probes /dev/video*, "synthetic" needs no hardware
    #[arg(long)]
    device: Option<String>,

    /// Frame width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Frame height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Sensor frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Seconds between cycle starts
    #[arg(long)]
    interval: Option<f64>,

    /// Question asked about every frame
    #[arg(long)]
    prompt: Option<String>,

    /// Logical model name, e.g. VILA-1.5-3B
    #[arg(long)]
    model: Option<String>,

    /// Inference backend
    #[arg(long, value_enum)]
    backend: Option<BackendMode>,

    /// Total run bound in seconds; 0 runs until Ctrl-C
    #[arg(long)]
    duration: Option<f64>,

    /// Save each answered cycle's frame as a JPEG here
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Append one JSON record per cycle here
    #[arg(long)]
    record_file: Option<PathBuf>,

    /// Skip the GStreamer hardware path even when compiled in
    #[arg(long)]
    no_gstreamer: bool,

    /// TOML config file (defaults to ./argus.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, mut config: LoopConfig) -> LoopConfig {
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if let Some(prompt) = self.prompt {
            config.prompt = prompt;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if self.snapshot_dir.is_some() {
            config.snapshot_dir = self.snapshot_dir;
        }
        if self.record_file.is_some() {
            config.record_file = self.record_file;
        }
        if self.no_gstreamer {
            config.use_gstreamer = false;
        }
        config
    }
}

fn build_source(config: &LoopConfig) -> Result<Box<dyn FrameSource>> {
    if config.device == "synthetic" {
        return Ok(Box::new(SyntheticSource::new(
            config.width,
            config.height,
            config.fps,
        )));
    }

    let device = if config.device.is_empty() || config.device == "auto" {
        v4l2::auto_detect_device()?
    } else {
        config.device.clone()
    };

    #[cfg(feature = "gstreamer-pipeline")]
    if config.use_gstreamer {
        return Ok(Box::new(argus::capture::gst::GstSource::new(
            &device,
            config.width,
            config.height,
            config.fps,
        )));
    }

    Ok(Box::new(V4l2Source::new(
        &device,
        config.width,
        config.height,
        config.fps,
    )))
}

fn build_backend(config: &LoopConfig) -> Result<Box<dyn InferenceBackend>> {
    match config.backend {
        BackendMode::Mock => Ok(Box::new(MockBackend::new())),
        BackendMode::Real => Ok(Box::new(VilaBackend::new(
            &config.model,
            ContainerLauncher::new(),
        )?)),
    }
}

fn build_sink(config: &LoopConfig) -> Result<Box<dyn ResultSink>> {
    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(ConsoleSink)];
    if let Some(path) = &config.record_file {
        sinks.push(Box::new(JsonlSink::create(path)?));
    }
    if let Some(dir) = &config.snapshot_dir {
        sinks.push(Box::new(SnapshotSink::create(dir)?));
    }
    Ok(Box::new(MultiSink::new(sinks)))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argus=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let config_file = cli.config.clone();
    let config = cli.apply(LoopConfig::load(config_file.as_deref())?);
    // Reject bad flags before any device or scratch dir is touched.
    config.validate()?;

    info!(
        "argus starting: device={:?} {}x{} every {}s, backend {:?}",
        config.device, config.width, config.height, config.interval_secs, config.backend
    );

    let source = build_source(&config)?;
    let backend = build_backend(&config)?;
    let sink = build_sink(&config)?;

    let mut poll = PollingLoop::new(config, source, backend, sink)?;

    let stop = poll.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current cycle");
            stop.stop();
        }
    });

    poll.run().await?;
    info!("argus done: {} cycles", poll.cycles());
    Ok(())
}
