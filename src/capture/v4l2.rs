//! V4L2 capture with mmap streaming and a latest-frame-wins handoff.
//!
//! The dequeue loop runs on a dedicated thread feeding a bounded(1) slot;
//! the producer drains the slot before every send, so the consumer can only
//! ever observe the newest frame and backlog is dropped instead of queued.
//! Each dequeue waits on poll(2) in short slices so the thread notices the
//! stop flag even when the sensor stops producing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::{CaptureStream, Stream as IoStream};
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::convert::{self, WireFormat};
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::errors::CameraError;

const BUFFER_COUNT: u32 = 4;
const EBUSY: i32 = 16;
/// Upper bound on each dequeue wait; the stop flag is re-checked between
/// slices so a wedged sensor cannot pin the thread.
const POLL_SLICE_MS: i32 = 100;

/// V4L2-backed frame source.
pub struct V4l2Source {
    device_path: String,
    width: u32,
    height: u32,
    fps: u32,
    capture_timeout: Duration,
    worker: Option<Worker>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    rx: flume::Receiver<Frame>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl V4l2Source {
    pub fn new(device_path: &str, width: u32, height: u32, fps: u32) -> Self {
        // 5x the nominal frame interval, floored so low-fps configs
        // still get a sane bound.
        let nominal = Duration::from_secs(1) / fps.max(1);
        let capture_timeout = (nominal * 5).max(Duration::from_millis(150));
        Self {
            device_path: device_path.to_string(),
            width,
            height,
            fps,
            capture_timeout,
            worker: None,
        }
    }

    fn open_device(&self) -> Result<Device, CameraError> {
        Device::with_path(&self.device_path).map_err(|e| map_open_error(&self.device_path, &e))
    }

    /// Pick the wire format the device will stream, preferring MJPEG for
    /// bandwidth, then YUYV, then raw RGB.
    fn negotiate_format(&self, device: &Device) -> Result<WireFormat, CameraError> {
        let formats = device
            .enum_formats()
            .map_err(|e| CameraError::BackendUnavailable(format!("enum_formats: {e}")))?;

        let offered: Vec<[u8; 4]> = formats.iter().map(|desc| desc.fourcc.repr).collect();
        let chosen = if offered.contains(b"MJPG") {
            Some(WireFormat::Mjpeg)
        } else if offered.contains(b"YUYV") {
            Some(WireFormat::Yuyv)
        } else if offered.contains(b"RGB3") {
            Some(WireFormat::Rgb24)
        } else {
            None
        };

        chosen.ok_or_else(|| {
            CameraError::BackendUnavailable(format!(
                "{} offers no MJPG/YUYV/RGB3 format",
                self.device_path
            ))
        })
    }
}

#[async_trait::async_trait]
impl FrameSource for V4l2Source {
    async fn open(&mut self) -> Result<(), CameraError> {
        if self.worker.is_some() {
            return Ok(());
        }

        info!("Initializing V4L2 capture: {}", self.device_path);
        let device = self.open_device()?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::BackendUnavailable(format!("query_caps: {e}")))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::BackendUnavailable(format!(
                "{} does not support video capture",
                self.device_path
            )));
        }

        let wire = self.negotiate_format(&device)?;
        info!("V4L2 wire format: {:?} (software conversion to RGB24)", wire);

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::BackendUnavailable(format!("get format: {e}")))?;
        fmt.width = self.width;
        fmt.height = self.height;
        fmt.fourcc = match wire {
            WireFormat::Mjpeg => FourCC::new(b"MJPG"),
            WireFormat::Yuyv => FourCC::new(b"YUYV"),
            WireFormat::Rgb24 => FourCC::new(b"RGB3"),
        };
        let applied = device
            .set_format(&fmt)
            .map_err(|e| CameraError::BackendUnavailable(format!("set format: {e}")))?;
        let (width, height) = (applied.width, applied.height);
        if (width, height) != (self.width, self.height) {
            warn!(
                "Device negotiated {}x{} instead of {}x{}",
                width, height, self.width, self.height
            );
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = flume::bounded::<Frame>(1);
        let (ready_tx, ready_rx) = flume::bounded::<Result<(), CameraError>>(1);

        let thread_stop = stop.clone();
        let drain = rx.clone();
        let handle = std::thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                capture_thread(device, wire, width, height, thread_stop, tx, drain, ready_tx)
            })
            .map_err(|e| CameraError::BackendUnavailable(format!("spawn capture thread: {e}")))?;

        ready_rx
            .recv_async()
            .await
            .map_err(|_| CameraError::BackendUnavailable("capture thread died".into()))??;

        self.worker = Some(Worker {
            stop,
            rx,
            handle: Some(handle),
        });
        info!(
            "Capture stream started with {} buffers at {}x{} (requested {}fps)",
            BUFFER_COUNT, width, height, self.fps
        );
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, CameraError> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| CameraError::BackendUnavailable("source not open".into()))?;

        match tokio::time::timeout(self.capture_timeout, worker.rx.recv_async()).await {
            Err(_) => Err(CameraError::CaptureTimeout(self.capture_timeout)),
            Ok(Err(_)) => Err(CameraError::BackendUnavailable(
                "capture thread exited".into(),
            )),
            Ok(Ok(frame)) => Ok(frame),
        }
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            // The thread owns the device; wait for it to exit so the fd is
            // released before close() returns. Bounded by POLL_SLICE_MS.
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("Capture thread panicked during shutdown");
                }
            }
            info!("V4L2 capture stopped: {}", self.device_path);
        }
    }

    fn path(&self) -> &str {
        &self.device_path
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn capture_thread(
    device: Device,
    wire: WireFormat,
    width: u32,
    height: u32,
    stop: Arc<AtomicBool>,
    tx: flume::Sender<Frame>,
    drain: flume::Receiver<Frame>,
    ready_tx: flume::Sender<Result<(), CameraError>>,
) {
    let handle = device.handle();
    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CameraError::BackendUnavailable(format!(
                "mmap stream: {e}"
            ))));
            return;
        }
    };
    // Start streaming before the first poll; with no buffers in flight
    // POLLIN would never signal.
    if let Err(e) = stream.start() {
        let _ = ready_tx.send(Err(CameraError::BackendUnavailable(format!(
            "stream on: {e}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let mut sequence: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        match handle.poll(libc::POLLIN, POLL_SLICE_MS) {
            Ok(0) => continue, // no frame yet; re-check the stop flag
            Ok(_) => {}
            Err(e) => {
                warn!("V4L2 poll failed: {e}");
                break;
            }
        }

        let (buf, meta) = match stream.next() {
            Ok(v) => v,
            Err(e) => {
                warn!("V4L2 dequeue failed: {e}");
                break;
            }
        };

        let rgb = match convert::to_rgb24(buf, wire, width, height) {
            Ok(rgb) => rgb,
            Err(e) => {
                // A torn frame from the sensor; drop it and keep streaming.
                warn!("Dropping undecodable frame: {e}");
                continue;
            }
        };

        sequence += 1;
        let frame = match Frame::new(
            Bytes::from(rgb),
            FrameMetadata {
                sequence,
                width,
                height,
                stride: width,
                format: PixelFormat::Rgb24,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            },
        ) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {e}");
                continue;
            }
        };

        // Latest-frame-wins: clear the slot, then publish.
        let _ = drain.try_recv();
        let _ = tx.try_send(frame);
    }
    drop(stream);
    drop(device);
}

fn map_open_error(path: &str, e: &std::io::Error) -> CameraError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CameraError::DeviceNotFound(path.to_string())
    } else if e.raw_os_error() == Some(EBUSY) {
        CameraError::DeviceBusy(path.to_string())
    } else {
        CameraError::BackendUnavailable(format!("{path}: {e}"))
    }
}

/// Probe /dev/video0..9 for the first device that can stream a format we
/// can convert. Used when no device is configured.
pub fn auto_detect_device() -> Result<String, CameraError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{i}");
        if !std::path::Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                    if let Ok(formats) = dev.enum_formats() {
                        for fmt in formats {
                            if matches!(&fmt.fourcc.repr, b"MJPG" | b"YUYV" | b"RGB3") {
                                info!("Found device: {} - {}", path, caps.card);
                                return Ok(path);
                            }
                        }
                    }
                }
            }
        }
    }

    Err(CameraError::DeviceNotFound(
        "no usable /dev/video* device".into(),
    ))
}
