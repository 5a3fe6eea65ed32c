use coffee_cam_common::config::{ScheduleConfig, UploadConfig};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::encode::encode;
use crate::shutdown::{StopSignal, Wake};
use crate::source::FrameSource;
use crate::upload::{Upload, UploadResult};

/// Where the capture loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Capturing,
    Encoding,
    Uploading,
    Sleeping { delay: Duration },
    Stopped,
}

/// Result of one pass through capture, encode and upload.
#[derive(Debug)]
pub enum Cycle {
    /// A frame was captured and encoded and one upload was attempted,
    /// successful or not.
    Uploaded(UploadResult),
    /// Capture or encode failed; nothing was uploaded.
    Retry,
}

/// Log label for an upload outcome.
pub fn outcome_label(result: &UploadResult) -> &'static str {
    if result.succeeded {
        "OK"
    } else {
        "FAIL"
    }
}

/// Sequential capture → encode → upload → sleep loop.
///
/// Owns the frame source, the shot counter and the stop signal. Exactly one
/// read, encode or upload is in flight at any time.
pub struct Driver<U> {
    source: Box<dyn FrameSource>,
    uploader: U,
    quality: u8,
    interval: Duration,
    retry_delay: Duration,
    stop: StopSignal,
    shots: u64,
    phase: Phase,
}

impl<U: Upload> Driver<U> {
    pub fn new(
        source: Box<dyn FrameSource>,
        uploader: U,
        upload: &UploadConfig,
        schedule: &ScheduleConfig,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            uploader,
            quality: upload.jpeg_quality,
            interval: schedule.interval(),
            retry_delay: schedule.retry_delay(),
            stop,
            shots: 0,
            phase: Phase::Starting,
        }
    }

    /// Shots attempted so far: frames that were captured and encoded.
    pub fn shots(&self) -> u64 {
        self.shots
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, shot = self.shots, "phase change");
        self.phase = phase;
    }

    /// Run one capture/encode/upload pass and move to `Sleeping` with the
    /// delay the outcome calls for.
    pub async fn step(&mut self) -> Cycle {
        let cycle = self.attempt().await;
        let delay = self.delay_after(&cycle);
        self.enter(Phase::Sleeping { delay });
        cycle
    }

    fn delay_after(&self, cycle: &Cycle) -> Duration {
        match cycle {
            Cycle::Uploaded(_) => self.interval,
            Cycle::Retry => self.retry_delay,
        }
    }

    async fn attempt(&mut self) -> Cycle {
        let shot = self.shots;

        self.enter(Phase::Capturing);
        info!(shot, "capturing frame");
        let frame = match self.source.read_frame() {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    shot,
                    error = %e,
                    "failed to read frame; retrying in {:?}",
                    self.retry_delay
                );
                return Cycle::Retry;
            }
        };
        if frame.is_empty() {
            warn!(
                shot,
                width = frame.width,
                height = frame.height,
                "source returned an empty frame; retrying in {:?}",
                self.retry_delay
            );
            return Cycle::Retry;
        }
        info!(
            shot,
            width = frame.width,
            height = frame.height,
            raw_bytes = frame.data.len(),
            captured_at_ms = frame.captured_at_ms,
            "frame captured"
        );

        self.enter(Phase::Encoding);
        let encoded = encode(&frame, self.quality);
        drop(frame);
        let image = match encoded {
            Ok(image) => image,
            Err(e) => {
                error!(
                    shot,
                    error = %e,
                    "JPEG encode failed; retrying in {:?}",
                    self.retry_delay
                );
                return Cycle::Retry;
            }
        };

        self.enter(Phase::Uploading);
        let result = self.uploader.upload(image, shot).await;
        if result.succeeded {
            info!(
                outcome = outcome_label(&result),
                shot,
                status = ?result.http_status,
                "shot uploaded"
            );
        } else {
            error!(
                outcome = outcome_label(&result),
                shot,
                status = ?result.http_status,
                error = ?result.error.as_ref().map(|e| e.to_string()),
                "shot upload failed"
            );
        }
        self.shots += 1;
        Cycle::Uploaded(result)
    }

    /// Loop until the stop signal fires, then close the source.
    /// Returns the number of shots attempted.
    pub async fn run(mut self) -> u64 {
        info!(
            source = self.source.name(),
            interval = ?self.interval,
            retry_delay = ?self.retry_delay,
            quality = self.quality,
            "capture loop started"
        );

        while !self.stop.is_stopped() {
            let cycle = self.step().await;
            let delay = self.delay_after(&cycle);
            info!("sleeping {:?} before next capture", delay);
            if self.stop.sleep(delay).await == Wake::Stopped {
                break;
            }
        }

        self.source.close();
        self.enter(Phase::Stopped);
        info!(shots = self.shots, "capture loop stopped");
        self.shots
    }
}
