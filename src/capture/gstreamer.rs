//! GStreamer capture backend (feature: capture-gstreamer).
//!
//! Builds a pipeline per resource scheme:
//! - `csi://N`: CSI sensor N via `nvarguscamerasrc`, rotated 180° in the
//!   ISP (`nvvidconv flip-method=2`), the physical-mount correction.
//! - `/dev/video*`: `v4l2src` with `videoflip method=rotate-180`.
//!
//! Frames are pulled from an appsink as packed RGB with a bounded wait; the
//! converter downstream handles the RGBA output format.

use anyhow::Context;
use std::time::Duration;

use super::{PixelFormat, RawFrame};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

pub(crate) struct GstreamerBackend {
    resource: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    width: u32,
    height: u32,
    last_error: Option<String>,
}

impl GstreamerBackend {
    pub(crate) fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        Self::build(config).map_err(|err| CaptureError::DeviceOpen {
            resource: config.resource.clone(),
            reason: format!("{err:#}"),
        })
    }

    fn build(config: &CaptureConfig) -> anyhow::Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = pipeline_description(config)?;
        let pipeline = gstreamer::parse_launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("start camera streaming")?;

        log::info!(
            "CaptureSource: opened {} ({}x{} requested)",
            config.resource,
            config.width,
            config.height
        );
        Ok(Self {
            resource: config.resource.clone(),
            pipeline,
            appsink,
            width: config.width,
            height: config.height,
            last_error: None,
        })
    }

    pub(crate) fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError> {
        self.poll_bus();
        if let Some(error) = self.last_error.take() {
            return Err(CaptureError::Device(error));
        }

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                timeout.as_millis() as u64
            ))
            .ok_or(CaptureError::Timeout { timeout })?;

        let (pixels, width, height) = sample_to_pixels(&sample)
            .map_err(|err| CaptureError::Device(format!("{err:#}")))?;

        // The device may renegotiate geometry; track what it actually delivers.
        self.width = width;
        self.height = height;

        Ok(RawFrame::new(pixels, width, height, PixelFormat::Rgb24))
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::from_mseconds(0)) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some(format!("{} reached EOS", self.resource));
                }
                _ => {}
            }
        }
    }
}

impl Drop for GstreamerBackend {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn pipeline_description(config: &CaptureConfig) -> anyhow::Result<String> {
    let framerate = framerate_fraction(config.framerate);
    if let Some(sensor) = config.resource.strip_prefix("csi://") {
        let sensor_id: u32 = sensor
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid CSI sensor id {sensor:?}"))?;
        // flip-method=2 is the ISP-level 180° rotation.
        Ok(format!(
            "nvarguscamerasrc sensor-id={sensor_id} ! \
             video/x-raw(memory:NVMM),width={w},height={h},framerate={framerate} ! \
             nvvidconv flip-method=2 ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            w = config.width,
            h = config.height,
        ))
    } else if config.resource.starts_with('/') {
        Ok(format!(
            "v4l2src device={device} ! \
             video/x-raw,width={w},height={h},framerate={framerate} ! \
             videoflip method=rotate-180 ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            device = config.resource,
            w = config.width,
            h = config.height,
        ))
    } else {
        anyhow::bail!("unsupported capture resource {:?}", config.resource)
    }
}

/// Express the requested framerate as a GStreamer caps fraction.
fn framerate_fraction(framerate: f64) -> String {
    // Millifps keeps fractional rates (e.g. 29.97) exact enough.
    let millifps = (framerate * 1000.0).round() as u64;
    if millifps % 1000 == 0 {
        format!("{}/1", millifps / 1000)
    } else {
        format!("{millifps}/1000")
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("capture sample missing buffer")?;
    let caps = sample.caps().context("capture sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse capture caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map capture buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("capture buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
