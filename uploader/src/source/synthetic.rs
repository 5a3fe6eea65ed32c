use coffee_cam_common::config::CameraConfig;
use coffee_cam_common::frame::{Frame, PixelFormat};
use tracing::debug;

use super::{discard_stale, FrameSource, ReadError};

/// Generated test pattern for running without camera hardware.
///
/// Produces a diagonal RGB gradient that shifts by a few pixels each frame,
/// so consecutive uploads are visibly different.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    flush_frames: u32,
    frame_count: u64,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            flush_frames: config.flush_frames,
            frame_count: 0,
            closed: false,
        }
    }

    fn generate(&mut self) -> Frame {
        self.frame_count += 1;
        let shift = (self.frame_count * 4) as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(((x + y) / 2 % 256) as u8);
            }
        }
        Frame::new(self.width, self.height, PixelFormat::Rgb8, data)
    }

    #[cfg(test)]
    fn frames_generated(&self) -> u64 {
        self.frame_count
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        if self.closed {
            return Err(ReadError::Closed);
        }
        let flush = self.flush_frames;
        discard_stale(flush, || {
            self.frame_count += 1;
            Ok(())
        })?;
        let frame = self.generate();
        debug!(frame_count = self.frame_count, "synthetic frame generated");
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
