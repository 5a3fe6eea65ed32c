use coffee_cam_common::config::CameraConfig;
use coffee_cam_common::frame::{Frame, PixelFormat};
use image::ImageReader;
use std::io::Cursor;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{
    discard_stale, strip_row_padding, yuyv_to_rgb, DeviceOpenError, FrameSource, ReadError,
};

const BUFFER_COUNT: u32 = 4;

/// USB-class camera exposed as `/dev/video{index}`.
pub struct V4l2Source {
    name: String,
    state: Option<DeviceState>,
    width: u32,
    height: u32,
    /// Bytes per line as reported by the driver, padding included.
    stride: u32,
    fourcc: FourCC,
    flush_frames: u32,
}

struct DeviceState {
    // Dropped before the device so the buffers are unmapped first.
    stream: MmapStream<'static>,
    _device: Device,
}

impl V4l2Source {
    pub fn open(index: u32, config: &CameraConfig) -> Result<Self, DeviceOpenError> {
        let name = format!("/dev/video{index}");
        let open_err = |reason: String| DeviceOpenError::Open {
            device: name.clone(),
            reason,
        };

        let device = Device::new(index as usize).map_err(|e| open_err(e.to_string()))?;

        let mut format = device.format().map_err(|e| open_err(e.to_string()))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(f) => f,
            Err(e) => {
                warn!(device = name, error = %e, "device rejected requested format, keeping current");
                device.format().map_err(|e| open_err(e.to_string()))?
            }
        };

        let params = v4l::video::capture::Parameters::with_fps(config.fps);
        if let Err(e) = device.set_params(&params) {
            warn!(device = name, error = %e, fps = config.fps, "failed to set frame rate");
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| open_err(e.to_string()))?;

        info!(
            device = name,
            width = format.width,
            height = format.height,
            stride = format.stride,
            fourcc = %format.fourcc,
            "V4L2 device configured"
        );

        Ok(Self {
            name,
            state: Some(DeviceState {
                stream,
                _device: device,
            }),
            width: format.width,
            height: format.height,
            stride: format.stride,
            fourcc: format.fourcc,
            flush_frames: config.flush_frames,
        })
    }

    /// Drop per-line padding from a raw buffer with `bytes_per_pixel` packing.
    fn packed(&self, buf: &[u8], bytes_per_pixel: usize) -> Result<Vec<u8>, ReadError> {
        strip_row_padding(
            buf,
            self.width as usize * bytes_per_pixel,
            self.stride as usize,
            self.height as usize,
        )
    }

    fn to_frame(&self, buf: &[u8]) -> Result<Frame, ReadError> {
        let (format, data) = match &self.fourcc.repr {
            b"RGB3" => (PixelFormat::Rgb8, self.packed(buf, 3)?),
            b"BGR3" => (PixelFormat::Bgr8, self.packed(buf, 3)?),
            b"GREY" => (PixelFormat::Luma8, self.packed(buf, 1)?),
            b"YUYV" => (PixelFormat::Rgb8, yuyv_to_rgb(&self.packed(buf, 2)?)),
            b"MJPG" => {
                let img = ImageReader::new(Cursor::new(buf))
                    .with_guessed_format()
                    .map_err(|e| ReadError::Device(e.to_string()))?
                    .decode()
                    .map_err(|e| ReadError::Device(format!("MJPEG decode: {e}")))?
                    .to_rgb8();
                let (w, h) = img.dimensions();
                return Ok(Frame::new(w, h, PixelFormat::Rgb8, img.into_raw()));
            }
            other => {
                return Err(ReadError::UnsupportedFormat(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        };
        Ok(Frame::new(self.width, self.height, format, data))
    }
}

impl FrameSource for V4l2Source {
    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        let state = self.state.as_mut().ok_or(ReadError::Closed)?;

        discard_stale(self.flush_frames, || {
            state
                .stream
                .next()
                .map(|_| ())
                .map_err(|e| ReadError::Device(e.to_string()))
        })?;

        let (buf, meta) = state
            .stream
            .next()
            .map_err(|e| ReadError::Device(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(ReadError::NoData);
        }
        let buf = buf[..used].to_vec();
        debug!(device = self.name, bytes = used, sequence = meta.sequence, "V4L2 buffer dequeued");

        let frame = self.to_frame(&buf)?;
        if frame.is_empty() {
            return Err(ReadError::EmptyFrame);
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            info!(device = self.name, "V4L2 device closed");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}
