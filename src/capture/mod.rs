//! Capture sources.
//!
//! This module owns the hardware-facing half of the pipeline:
//! - `CaptureSource`: wraps one device session, produces `RawFrame`s on
//!   demand with a bounded wait.
//! - `FrameSource`: the trait seam the acquisition loop drives, so tests can
//!   script captures without hardware.
//!
//! Backends:
//! - `stub://…` paths select a synthetic pattern generator (always built).
//! - GStreamer backend (feature: capture-gstreamer) for `csi://N` sensors
//!   and `/dev/video*` nodes.
//! - Direct libv4l backend (feature: capture-v4l2) for `/dev/video*` nodes.
//!
//! The capture layer is responsible for:
//! - Negotiating geometry/framerate with the device
//! - Applying the fixed 180° mount-correction rotation at the device level
//! - Handing each frame off exactly once; buffers may be reused on the next
//!   capture call and must not be retained by callers

#[cfg(feature = "capture-gstreamer")]
mod gstreamer;
mod synthetic;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

use std::time::Duration;

use crate::config::CaptureConfig;
use crate::error::CaptureError;

#[cfg(feature = "capture-gstreamer")]
use self::gstreamer::GstreamerBackend;
use self::synthetic::SyntheticBackend;
#[cfg(feature = "capture-v4l2")]
use self::v4l2::V4l2Backend;

/// Scheme prefix selecting the synthetic backend.
pub const STUB_SCHEME: &str = "stub://";

/// Pixel format tag carried by every raw frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel. The fixed output format.
    Rgba8,
    /// 8-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// Planar Y followed by interleaved UV at half resolution.
    Nv12,
    /// Packed YUV 4:2:2, 2 bytes per pixel. Requires even width.
    Yuyv,
    /// Motion-JPEG. Common V4L2 negotiation result; the converter does not
    /// decode it.
    Mjpeg,
}

impl PixelFormat {
    /// Expected buffer length for a frame of the given geometry, or `None`
    /// when the format has no fixed per-pixel size (compressed formats).
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgba8 => Some(pixels * 4),
            PixelFormat::Rgb24 => Some(pixels * 3),
            PixelFormat::Nv12 => Some(pixels + pixels / 2),
            PixelFormat::Yuyv => Some(pixels * 2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// One raw frame as delivered by a capture backend.
///
/// Owned transiently: the capture source may reuse or overwrite the
/// underlying buffer on the next `capture` call, so callers hand the frame to
/// the converter and drop it before the next cycle.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Trait seam between the acquisition loop and a capture backend.
///
/// `CaptureSource` is the production implementation; tests drive the loop
/// with scripted sources.
pub trait FrameSource {
    /// Block up to `timeout` for the next frame.
    fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError>;

    /// Current negotiated capture width. May change between calls if the
    /// device renegotiates.
    fn width(&self) -> u32;

    /// Current negotiated capture height.
    fn height(&self) -> u32;

    /// Stable identifier for the opened device. Read once at open to seed
    /// the envelope source id.
    fn resource_id(&self) -> &str;
}

/// Capture source wrapping one device session.
pub struct CaptureSource {
    resource: String,
    backend: Backend,
}

enum Backend {
    Synthetic(SyntheticBackend),
    #[cfg(feature = "capture-gstreamer")]
    Gstreamer(GstreamerBackend),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2Backend),
}

impl CaptureSource {
    /// Open the device session described by `config`.
    ///
    /// The session is configured once: geometry, framerate, and the fixed
    /// 180° rotation are applied here and are immutable afterwards. Failure
    /// is terminal for the process.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let backend = if config.resource.starts_with(STUB_SCHEME) {
            Backend::Synthetic(SyntheticBackend::open(config))
        } else {
            open_hardware(config)?
        };
        Ok(Self {
            resource: config.resource.clone(),
            backend,
        })
    }
}

fn open_hardware(config: &CaptureConfig) -> Result<Backend, CaptureError> {
    #[cfg(feature = "capture-gstreamer")]
    {
        GstreamerBackend::open(config).map(Backend::Gstreamer)
    }
    #[cfg(all(feature = "capture-v4l2", not(feature = "capture-gstreamer")))]
    {
        V4l2Backend::open(config).map(Backend::V4l2)
    }
    #[cfg(not(any(feature = "capture-gstreamer", feature = "capture-v4l2")))]
    {
        Err(CaptureError::DeviceOpen {
            resource: config.resource.clone(),
            reason: "no hardware capture backend compiled in \
                     (enable capture-gstreamer or capture-v4l2)"
                .to_string(),
        })
    }
}

impl FrameSource for CaptureSource {
    fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError> {
        match &mut self.backend {
            Backend::Synthetic(backend) => backend.capture(timeout),
            #[cfg(feature = "capture-gstreamer")]
            Backend::Gstreamer(backend) => backend.capture(timeout),
            #[cfg(feature = "capture-v4l2")]
            Backend::V4l2(backend) => backend.capture(timeout),
        }
    }

    fn width(&self) -> u32 {
        match &self.backend {
            Backend::Synthetic(backend) => backend.width(),
            #[cfg(feature = "capture-gstreamer")]
            Backend::Gstreamer(backend) => backend.width(),
            #[cfg(feature = "capture-v4l2")]
            Backend::V4l2(backend) => backend.width(),
        }
    }

    fn height(&self) -> u32 {
        match &self.backend {
            Backend::Synthetic(backend) => backend.height(),
            #[cfg(feature = "capture-gstreamer")]
            Backend::Gstreamer(backend) => backend.height(),
            #[cfg(feature = "capture-v4l2")]
            Backend::V4l2(backend) => backend.height(),
        }
    }

    fn resource_id(&self) -> &str {
        &self.resource
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CaptureConfig {
        CaptureConfig {
            resource: "stub://bench".to_string(),
            width: 640,
            height: 480,
            framerate: 0.0,
        }
    }

    #[test]
    fn stub_source_produces_frames() -> anyhow::Result<()> {
        let mut source = CaptureSource::open(&stub_config())?;

        let frame = source.capture(Duration::from_secs(1))?;
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.bytes().len(), 640 * 480 * 3);

        Ok(())
    }

    #[test]
    fn stub_source_reports_resource_id() -> anyhow::Result<()> {
        let source = CaptureSource::open(&stub_config())?;
        assert_eq!(source.resource_id(), "stub://bench");
        Ok(())
    }

    #[cfg(not(any(feature = "capture-gstreamer", feature = "capture-v4l2")))]
    #[test]
    fn hardware_resource_without_backend_fails_to_open() {
        let config = CaptureConfig {
            resource: "csi://0".to_string(),
            ..stub_config()
        };
        let err = CaptureSource::open(&config).err().expect("open must fail");
        assert!(matches!(err, CaptureError::DeviceOpen { .. }));
    }

    #[test]
    fn frame_len_matches_format() {
        assert_eq!(PixelFormat::Rgba8.frame_len(2, 2), Some(16));
        assert_eq!(PixelFormat::Rgb24.frame_len(2, 2), Some(12));
        assert_eq!(PixelFormat::Nv12.frame_len(2, 2), Some(6));
        assert_eq!(PixelFormat::Yuyv.frame_len(2, 2), Some(8));
        assert_eq!(PixelFormat::Mjpeg.frame_len(2, 2), None);
    }
}
