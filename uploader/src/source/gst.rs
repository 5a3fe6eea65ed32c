use coffee_cam_common::config::CameraConfig;
use coffee_cam_common::frame::{Frame, PixelFormat};
use gstreamer::prelude::*;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{discard_stale, strip_row_padding, DeviceOpenError, FrameSource, ReadError};

/// Camera reached through a GStreamer pipeline description, e.g.
/// `libcamerasrc ! video/x-raw,width=1280,height=720 ! videoconvert ! appsink`.
///
/// The last `appsink` in the description is forced to packed RGB.
pub struct PipelineSource {
    pipeline: Option<gstreamer::Pipeline>,
    appsink: gstreamer_app::AppSink,
    flush_frames: u32,
    pull_timeout: Duration,
}

impl PipelineSource {
    pub fn open(descriptor: &str, config: &CameraConfig) -> Result<Self, DeviceOpenError> {
        let open_err = |reason: String| DeviceOpenError::Open {
            device: descriptor.to_string(),
            reason,
        };

        gstreamer::init().map_err(|e| open_err(format!("initialize gstreamer: {e}")))?;

        let pipeline = gstreamer::parse::launch(descriptor)
            .map_err(|e| open_err(e.to_string()))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| open_err("description is not a pipeline".into()))?;

        let appsink = pipeline
            .iterate_sinks()
            .into_iter()
            .filter_map(Result::ok)
            .find_map(|e| e.downcast::<gstreamer_app::AppSink>().ok())
            .ok_or_else(|| open_err("pipeline has no appsink element".into()))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_err(format!("set pipeline to Playing: {e}")))?;

        info!(pipeline = descriptor, "GStreamer pipeline playing");

        // Several frame periods, never under half a second.
        let pull_timeout = Duration::from_millis((4000 / config.fps.max(1)).max(500) as u64);

        Ok(Self {
            pipeline: Some(pipeline),
            appsink,
            flush_frames: config.flush_frames,
            pull_timeout,
        })
    }

    fn pull(&self) -> Result<gstreamer::Sample, ReadError> {
        self.check_bus()?;
        self.appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                self.pull_timeout.as_millis() as u64,
            ))
            .ok_or(ReadError::NoData)
    }

    fn check_bus(&self) -> Result<(), ReadError> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Err(ReadError::Closed);
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(ReadError::Device(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => return Err(ReadError::NoData),
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameSource for PipelineSource {
    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        if self.pipeline.is_none() {
            return Err(ReadError::Closed);
        }
        discard_stale(self.flush_frames, || self.pull().map(|_| ()))?;

        let sample = self.pull()?;
        let frame = sample_to_frame(&sample)?;
        if frame.is_empty() {
            return Err(ReadError::EmptyFrame);
        }
        debug!(width = frame.width, height = frame.height, "pipeline sample pulled");
        Ok(frame)
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!(error = %e, "failed to stop GStreamer pipeline");
            }
            info!("GStreamer pipeline stopped");
        }
    }

    fn name(&self) -> &str {
        "gstreamer"
    }
}

impl Drop for PipelineSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copy an RGB sample into a tightly packed frame, dropping row padding.
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame, ReadError> {
    let buffer = sample.buffer().ok_or(ReadError::NoData)?;
    let caps = sample.caps().ok_or(ReadError::NoData)?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| ReadError::Device(format!("parse caps: {e}")))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| ReadError::Device(format!("map buffer: {e}")))?;
    let pixels = strip_row_padding(map.as_slice(), row_bytes, stride, height as usize)?;
    Ok(Frame::new(width, height, PixelFormat::Rgb8, pixels))
}
