//! Direct libv4l capture backend (feature: capture-v4l2).
//!
//! Opens a `/dev/video*` node, negotiates packed RGB, and dequeues frames
//! from an mmap buffer stream, polling the device fd so each capture call
//! waits a bounded time. The mount-correction rotation is applied as a
//! buffer reversal here: unlike the GStreamer path there is no element to
//! flip in, and reversing RGB pixel order end-to-end is exactly a 180° turn.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::Duration;

use super::{PixelFormat, RawFrame};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

pub(crate) struct V4l2Backend {
    resource: String,
    fd: std::os::raw::c_int,
    state: DeviceState,
    width: u32,
    height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Backend {
    pub(crate) fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        Self::build(config).map_err(|err| CaptureError::DeviceOpen {
            resource: config.resource.clone(),
            reason: format!("{err:#}"),
        })
    }

    fn build(config: &CaptureConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        if !config.resource.starts_with('/') {
            anyhow::bail!(
                "v4l2 backend only opens local device nodes, got {:?}",
                config.resource
            );
        }

        let device = v4l::Device::with_path(&config.resource)
            .with_context(|| format!("open v4l2 device {}", config.resource))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CaptureSource: failed to set format on {}: {}",
                    config.resource,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let fps = config.framerate.round() as u32;
        if fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CaptureSource: failed to set fps on {}: {}",
                    config.resource,
                    err
                );
            }
        }

        let fd = device.handle().fd();
        let mut state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        // Queue the buffers and start streaming now, so the fd becomes
        // readable once the first frame lands and capture() can poll it.
        use v4l::io::traits::Stream;
        state
            .with_mut(|fields| fields.stream.start())
            .context("start v4l2 stream")?;

        log::info!(
            "CaptureSource: opened {} ({}x{})",
            config.resource,
            format.width,
            format.height
        );
        Ok(Self {
            resource: config.resource.clone(),
            fd,
            state,
            width: format.width,
            height: format.height,
        })
    }

    pub(crate) fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        // VIDIOC_DQBUF on a blocking fd waits forever; poll first so the
        // wait stays bounded and a stalled device surfaces as a timeout.
        let readable = wait_readable(self.fd, timeout)
            .map_err(|err| CaptureError::Device(format!("poll {}: {}", self.resource, err)))?;
        if !readable {
            return Err(CaptureError::Timeout { timeout });
        }

        let (buf, _meta) = self
            .state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    CaptureError::Timeout { timeout }
                }
                _ => CaptureError::Device(format!("dequeue from {}: {}", self.resource, err)),
            })?;

        let pixels = rotate_180_rgb(buf);
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
}

/// Block up to `timeout` for the fd to become readable. Returns `Ok(false)`
/// on timeout.
fn wait_readable(fd: std::os::raw::c_int, timeout: Duration) -> std::io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    loop {
        let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0);
    }
}

/// Reverse RGB pixel order end-to-end (a 180° rotation).
fn rotate_180_rgb(buf: &[u8]) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(buf.len());
    for chunk in buf.chunks_exact(3).rev() {
        pixels.extend_from_slice(chunk);
    }
    // Trailing bytes that don't form a whole pixel are dropped.
    pixels
}
