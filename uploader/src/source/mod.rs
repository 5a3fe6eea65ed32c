//! Camera frame sources.
//!
//! A source is opened once at startup and then asked for one frame per
//! driver iteration. Sources never retry: a failed read is reported to the
//! caller, which owns the retry policy.

#[cfg(feature = "gstreamer")]
mod gst;
mod synthetic;
#[cfg(feature = "v4l2")]
mod v4l2;

use coffee_cam_common::config::{CameraConfig, SourceSelector};
use coffee_cam_common::frame::Frame;
use tracing::{debug, info};

pub use synthetic::SyntheticSource;

/// Blocking producer of raw frames.
pub trait FrameSource: Send {
    /// Discard any stale buffered frames, then return the next one.
    fn read_frame(&mut self) -> Result<Frame, ReadError>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[cfg_attr(not(any(feature = "v4l2", feature = "gstreamer")), allow(dead_code))]
#[derive(Debug, thiserror::Error)]
pub enum DeviceOpenError {
    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("{0} support is not compiled in (enable the `{1}` feature)")]
    Unsupported(&'static str, &'static str),
}

#[cfg_attr(not(any(feature = "v4l2", feature = "gstreamer")), allow(dead_code))]
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("device returned no data")]
    NoData,
    #[error("device returned an empty frame")]
    EmptyFrame,
    #[error("device error: {0}")]
    Device(String),
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(String),
    #[error("source is closed")]
    Closed,
}

/// Open the device named by `config.source`. The requested resolution and
/// frame rate are hints; backends log what the device actually granted.
pub fn open(config: &CameraConfig) -> Result<Box<dyn FrameSource>, DeviceOpenError> {
    info!(
        source = %config.source,
        width = config.width,
        height = config.height,
        fps = config.fps,
        "opening camera"
    );

    let source: Box<dyn FrameSource> = match &config.source {
        SourceSelector::Synthetic => Box::new(SyntheticSource::new(config)),
        #[cfg(feature = "v4l2")]
        SourceSelector::Usb { index } => Box::new(v4l2::V4l2Source::open(*index, config)?),
        #[cfg(not(feature = "v4l2"))]
        SourceSelector::Usb { .. } => {
            return Err(DeviceOpenError::Unsupported("USB camera", "v4l2"));
        }
        #[cfg(feature = "gstreamer")]
        SourceSelector::Pipeline { descriptor } => {
            Box::new(gst::PipelineSource::open(descriptor, config)?)
        }
        #[cfg(not(feature = "gstreamer"))]
        SourceSelector::Pipeline { .. } => {
            return Err(DeviceOpenError::Unsupported("GStreamer pipeline", "gstreamer"));
        }
    };

    info!(source = source.name(), "camera opened");
    Ok(source)
}

/// Pull and drop `count` frames so the next read reflects the present scene
/// rather than whatever sat in the driver's queue.
pub(crate) fn discard_stale<F>(count: u32, mut grab: F) -> Result<(), ReadError>
where
    F: FnMut() -> Result<(), ReadError>,
{
    for _ in 0..count {
        grab()?;
    }
    if count > 0 {
        debug!(count, "discarded stale frames");
    }
    Ok(())
}

/// Copy `height` rows of `row_bytes` each out of a buffer whose rows start
/// every `stride` bytes. A stride no wider than a row means already packed.
#[cfg_attr(not(any(feature = "v4l2", feature = "gstreamer")), allow(dead_code))]
pub(crate) fn strip_row_padding(
    data: &[u8],
    row_bytes: usize,
    stride: usize,
    height: usize,
) -> Result<Vec<u8>, ReadError> {
    if stride <= row_bytes {
        return Ok(data.to_vec());
    }
    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let line = data.get(start..start + row_bytes).ok_or_else(|| {
            ReadError::Device(format!(
                "row {row} out of bounds ({} bytes, stride {stride})",
                data.len()
            ))
        })?;
        packed.extend_from_slice(line);
    }
    Ok(packed)
}

/// Packed YUYV (4:2:2) to RGB24, BT.601 full range.
#[cfg_attr(not(feature = "v4l2"), allow(dead_code))]
pub(crate) fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&yuv_to_rgb(chunk[2], u, v));
    }
    rgb
}

#[cfg_attr(not(feature = "v4l2"), allow(dead_code))]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffee_cam_common::frame::PixelFormat;

    #[test]
    fn opens_synthetic_source() {
        let config = CameraConfig {
            source: SourceSelector::Synthetic,
            width: 64,
            height: 48,
            ..CameraConfig::default()
        };
        let mut source = open(&config).unwrap();
        let frame = source.read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        source.close();
    }

    #[cfg(not(feature = "v4l2"))]
    #[test]
    fn usb_without_feature_is_open_error() {
        let config = CameraConfig::default();
        assert!(matches!(
            open(&config),
            Err(DeviceOpenError::Unsupported(_, "v4l2"))
        ));
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn pipeline_without_feature_is_open_error() {
        let config = CameraConfig {
            source: SourceSelector::Pipeline {
                descriptor: "videotestsrc ! appsink".into(),
            },
            ..CameraConfig::default()
        };
        assert!(matches!(
            open(&config),
            Err(DeviceOpenError::Unsupported(_, "gstreamer"))
        ));
    }

    #[test]
    fn discard_stale_pulls_exact_count() {
        let mut pulled = 0;
        discard_stale(3, || {
            pulled += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(pulled, 3);
    }

    #[test]
    fn discard_stale_stops_on_error() {
        let mut pulled = 0;
        let result = discard_stale(5, || {
            pulled += 1;
            if pulled == 2 {
                Err(ReadError::NoData)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(ReadError::NoData)));
        assert_eq!(pulled, 2);
    }

    #[test]
    fn padded_rows_are_packed_to_frame_size() {
        // 2x3 RGB with rows padded to 8 bytes, last row unpadded.
        let mut data = Vec::new();
        for row in 0..3u8 {
            data.extend_from_slice(&[row; 6]);
            if row < 2 {
                data.extend_from_slice(&[0xEE; 2]);
            }
        }
        let packed = strip_row_padding(&data, 6, 8, 3).unwrap();
        assert_eq!(packed.len(), 18);
        assert!(!packed.contains(&0xEE));

        let frame = Frame::new(2, 3, PixelFormat::Rgb8, packed);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn unpadded_buffer_passes_through() {
        let data = vec![7u8; 12];
        assert_eq!(strip_row_padding(&data, 6, 6, 2).unwrap(), data);
        assert_eq!(strip_row_padding(&data, 6, 0, 2).unwrap(), data);
    }

    #[test]
    fn short_padded_buffer_is_device_error() {
        let data = vec![0u8; 10];
        assert!(matches!(
            strip_row_padding(&data, 6, 8, 2),
            Err(ReadError::Device(_))
        ));
    }

    #[test]
    fn padded_yuyv_converts_to_full_rgb_frame() {
        // 2x2 YUYV, 4 bytes per row padded to 6.
        let data = [128, 128, 128, 128, 0, 0, 128, 128, 128, 128, 0, 0];
        let rgb = yuyv_to_rgb(&strip_row_padding(&data, 4, 6, 2).unwrap());
        let frame = Frame::new(2, 2, PixelFormat::Rgb8, rgb);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn yuyv_grey_maps_to_grey() {
        // Two pixels, both Y=128 with neutral chroma.
        let rgb = yuyv_to_rgb(&[128, 128, 128, 128]);
        assert_eq!(rgb, vec![128, 128, 128, 128, 128, 128]);
    }

    #[test]
    fn yuyv_output_is_three_bytes_per_pixel() {
        let rgb = yuyv_to_rgb(&[0u8; 4 * 10]);
        assert_eq!(rgb.len(), 20 * 3);
    }
}
