//! Synthetic capture backend (`stub://`).
//!
//! Generates RGB pattern frames without any hardware. Used by tests, benches,
//! and deployments that want to exercise the publish path before a camera is
//! attached. Paces itself to the configured framerate so the acquisition loop
//! sees the same blocking-wait behavior a real device exhibits.

use std::time::{Duration, Instant};

use super::{PixelFormat, RawFrame};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

pub(crate) struct SyntheticBackend {
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    next_frame_at: Option<Instant>,
    frame_count: u64,
    /// Simulated "scene" state so consecutive frames differ.
    scene_state: u8,
}

impl SyntheticBackend {
    pub(crate) fn open(config: &CaptureConfig) -> Self {
        let frame_interval = if config.framerate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / config.framerate))
        } else {
            None
        };
        log::info!("CaptureSource: opened {} (synthetic)", config.resource);
        Self {
            width: config.width,
            height: config.height,
            frame_interval,
            next_frame_at: None,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub(crate) fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError> {
        self.pace(timeout)?;

        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(RawFrame::new(
            pixels,
            self.width,
            self.height,
            PixelFormat::Rgb24,
        ))
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    /// Emulate the device's blocking wait: sleep until the next frame is due.
    /// A frame interval longer than the caller's bounded wait times out, just
    /// like a stalled sensor would.
    fn pace(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let Some(interval) = self.frame_interval else {
            return Ok(());
        };
        let now = Instant::now();
        let due = self.next_frame_at.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                self.next_frame_at = Some(due);
                return Err(CaptureError::Timeout { timeout });
            }
            std::thread::sleep(wait);
        }
        self.next_frame_at = Some(due.max(now) + interval);
        Ok(())
    }

    /// Generate RGB pattern pixels. The pattern shifts with the frame count
    /// and an occasional scene change so downstream consumers see motion.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
