//! Result sinks: where each cycle's answer (or error) ends up.
//!
//! Sinks are pure side effects. The loop swallows and counts sink
//! failures; nothing here can abort polling.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::backend::Answer;
use crate::capture::Frame;
use crate::errors::SinkError;

/// Frame metadata carried alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct FrameInfo {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

impl From<&Frame> for FrameInfo {
    fn from(frame: &Frame) -> Self {
        Self {
            sequence: frame.meta.sequence,
            width: frame.meta.width,
            height: frame.meta.height,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    Answer(Answer),
    Error { message: String, transient: bool },
}

/// One published polling cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub timestamp: SystemTime,
    pub device: String,
    pub prompt: String,
    pub frame: Option<FrameInfo>,
    pub outcome: CycleOutcome,
    /// Pixel data for sinks that want it; never serialized.
    #[serde(skip)]
    pub pixels: Option<Frame>,
}

pub trait ResultSink: Send {
    fn publish(&mut self, record: &CycleRecord) -> Result<(), SinkError>;
}

/// One status line per cycle, the way the source scripts printed theirs.
pub struct ConsoleSink;

impl ResultSink for ConsoleSink {
    fn publish(&mut self, record: &CycleRecord) -> Result<(), SinkError> {
        match &record.outcome {
            CycleOutcome::Answer(answer) => info!(
                "cycle {} [{} {:.1}s] {}",
                record.cycle,
                answer.model,
                answer.latency.as_secs_f64(),
                answer.text
            ),
            CycleOutcome::Error { message, transient } => warn!(
                "cycle {} {}: {}",
                record.cycle,
                if *transient { "skipped" } else { "failed" },
                message
            ),
        }
        Ok(())
    }
}

/// Appends one JSON object per cycle to a file.
pub struct JsonlSink {
    file: std::fs::File,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl ResultSink for JsonlSink {
    fn publish(&mut self, record: &CycleRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }
}

/// Saves each answered cycle's frame as a JPEG snapshot.
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

impl ResultSink for SnapshotSink {
    fn publish(&mut self, record: &CycleRecord) -> Result<(), SinkError> {
        let (CycleOutcome::Answer(_), Some(frame)) = (&record.outcome, &record.pixels) else {
            return Ok(());
        };
        let rgb: Vec<u8> = match frame.meta.format {
            crate::capture::PixelFormat::Rgb24 => frame.data.to_vec(),
            crate::capture::PixelFormat::Bgr24 => frame
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        let img = image::RgbImage::from_raw(frame.meta.width, frame.meta.height, rgb)
            .ok_or_else(|| SinkError::Encode("frame buffer does not fit geometry".into()))?;
        let path = self.dir.join(format!("snapshot_{:06}.jpg", record.cycle));
        img.save_with_format(&path, image::ImageFormat::Jpeg)
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        Ok(())
    }
}

/// Fan-out to several sinks; the first failure is reported, the rest still
/// get the record.
pub struct MultiSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

impl ResultSink for MultiSink {
    fn publish(&mut self, record: &CycleRecord) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(record) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Collects records in memory. Test instrumentation.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CycleRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CycleRecord> {
        self.records.lock().expect("sink mutex poisoned").clone()
    }
}

impl ResultSink for MemorySink {
    fn publish(&mut self, record: &CycleRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .expect("sink mutex poisoned")
            .push(record.clone());
        Ok(())
    }
}
