//! GStreamer capture for CSI sensors with hardware acceleration.
//!
//! Prefers the Jetson `nvarguscamerasrc` path (NVMM memory, hardware color
//! conversion) and falls back to a plain `v4l2src` pipeline when the element
//! is not installed. The appsink is configured single-buffer with drop=true,
//! so a slow consumer always sees the newest frame.

use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{info, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::errors::CameraError;

/// Which acquisition path `open()` ended up constructing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GstPath {
    NvArgus,
    V4l2Src,
}

pub struct GstSource {
    device_path: String,
    width: u32,
    height: u32,
    fps: u32,
    capture_timeout: Duration,
    pipeline: Option<gst::Pipeline>,
    appsink: Option<gst_app::AppSink>,
    chosen_path: Option<GstPath>,
    sequence: u64,
}

impl GstSource {
    pub fn new(device_path: &str, width: u32, height: u32, fps: u32) -> Self {
        let nominal = Duration::from_secs(1) / fps.max(1);
        Self {
            device_path: device_path.to_string(),
            width,
            height,
            fps,
            capture_timeout: (nominal * 5).max(Duration::from_millis(150)),
            pipeline: None,
            appsink: None,
            chosen_path: None,
            sequence: 0,
        }
    }

    /// Build the pipeline string, probing for the hardware camera element.
    fn build_pipeline_string(&self) -> (String, GstPath) {
        if gst::ElementFactory::find("nvarguscamerasrc").is_some() {
            let pipeline = format!(
                "nvarguscamerasrc sensor-id=0 ! \
                 video/x-raw(memory:NVMM),width={w},height={h},format=NV12,framerate={f}/1 ! \
                 nvvidconv ! \
                 video/x-raw,width={w},height={h},format=BGRx ! \
                 videoconvert ! \
                 video/x-raw,format=RGB ! \
                 appsink name=appsink",
                w = self.width,
                h = self.height,
                f = self.fps
            );
            (pipeline, GstPath::NvArgus)
        } else {
            let pipeline = format!(
                "v4l2src device={dev} name=source ! \
                 queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 ! \
                 videoconvert ! \
                 video/x-raw,format=RGB,width={w},height={h} ! \
                 appsink name=appsink",
                dev = self.device_path,
                w = self.width,
                h = self.height
            );
            (pipeline, GstPath::V4l2Src)
        }
    }

    pub fn chosen_path(&self) -> Option<GstPath> {
        self.chosen_path
    }
}

#[async_trait::async_trait]
impl FrameSource for GstSource {
    async fn open(&mut self) -> Result<(), CameraError> {
        if self.pipeline.is_some() {
            return Ok(());
        }

        gst::init()
            .map_err(|e| CameraError::BackendUnavailable(format!("gstreamer init: {e}")))?;

        let (pipeline_str, path) = self.build_pipeline_string();
        match path {
            GstPath::NvArgus => info!("Using nvarguscamerasrc (hardware accelerated)"),
            GstPath::V4l2Src => {
                if !std::path::Path::new(&self.device_path).exists() {
                    return Err(CameraError::DeviceNotFound(self.device_path.clone()));
                }
                warn!(
                    "nvarguscamerasrc not found, falling back to v4l2src for {}",
                    self.device_path
                );
            }
        }
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| CameraError::BackendUnavailable(format!("pipeline parse: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CameraError::BackendUnavailable("not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CameraError::BackendUnavailable("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CameraError::BackendUnavailable("appsink cast failed".into()))?;

        // Single buffer, drop old frames, no clock sync: the consumer only
        // ever sees the newest frame.
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CameraError::BackendUnavailable(format!("pipeline start: {e:?}")))?;

        let (state_change, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::Async) => {}
            other => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(CameraError::BackendUnavailable(format!(
                    "pipeline failed to reach PLAYING: {other:?}"
                )));
            }
        }

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        self.chosen_path = Some(path);
        info!("GStreamer capture started via {:?}", path);
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, CameraError> {
        let appsink = self
            .appsink
            .as_ref()
            .ok_or_else(|| CameraError::BackendUnavailable("source not open".into()))?;

        let timeout = gst::ClockTime::from_mseconds(self.capture_timeout.as_millis() as u64);
        let sample = appsink
            .try_pull_sample(timeout)
            .ok_or(CameraError::CaptureTimeout(self.capture_timeout))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| CameraError::MalformedFrame("sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CameraError::MalformedFrame("buffer map failed".into()))?;

        let caps = sample
            .caps()
            .ok_or_else(|| CameraError::MalformedFrame("sample without caps".into()))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| CameraError::MalformedFrame("unreadable caps".into()))?;

        // RGB rows may carry alignment padding; repack to a tight buffer.
        let width = video_info.width();
        let height = video_info.height();
        let expected = width as usize * height as usize * 3;
        let raw = map.as_slice();
        let data = if raw.len() == expected {
            Bytes::copy_from_slice(raw)
        } else {
            let stride = video_info.stride()[0] as usize;
            let row = width as usize * 3;
            if stride < row || raw.len() < stride * height as usize {
                return Err(CameraError::MalformedFrame(format!(
                    "buffer {} bytes for {}x{} stride {}",
                    raw.len(),
                    width,
                    height,
                    stride
                )));
            }
            let mut packed = Vec::with_capacity(expected);
            for y in 0..height as usize {
                packed.extend_from_slice(&raw[y * stride..y * stride + row]);
            }
            Bytes::from(packed)
        };

        self.sequence += 1;
        Frame::new(
            data,
            FrameMetadata {
                sequence: self.sequence,
                width,
                height,
                stride: width,
                format: PixelFormat::Rgb24,
                device_timestamp: buffer.pts().map(|pts| pts.into()),
            },
        )
    }

    fn close(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!("Failed to stop pipeline: {e:?}");
            }
            info!("GStreamer capture stopped");
        }
    }

    fn path(&self) -> &str {
        &self.device_path
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.close();
    }
}
