//! Continuous camera acquisition pipeline.
//!
//! This crate implements the acquire → resize → convert → stamp → publish
//! cycle behind the `camerad` daemon:
//!
//! 1. **Capture**: one device session produces raw pixel buffers on demand
//!    with a bounded wait.
//! 2. **Convert**: a reusable buffer turns each raw frame into RGBA8,
//!    reallocating only when geometry or source format changes.
//! 3. **Stamp**: a monotonically increasing sequence number, a wall-clock
//!    timestamp, and a stable source identifier are attached.
//! 4. **Publish**: the frame is handed to the downstream transport in one
//!    logical call.
//!
//! # Module Structure
//!
//! - `capture`: device sessions and the `FrameSource` seam
//! - `convert`: the reusable-buffer pixel-format converter
//! - `envelope`: per-frame metadata
//! - `pipeline`: the acquisition loop
//! - `publish`: transports (`MqttPublisher`, `MemoryPublisher`)
//! - `config`: startup configuration layering

pub mod capture;
pub mod config;
pub mod convert;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod publish;

pub use capture::{CaptureSource, FrameSource, PixelFormat, RawFrame};
pub use config::{CaptureConfig, CliOverrides, ParamSource};
pub use convert::{ConvertedFrameView, FrameConverter, OUTPUT_FORMAT};
pub use envelope::FrameEnvelope;
pub use error::{CaptureError, ConvertError};
pub use pipeline::{AcquisitionPipeline, PipelineStats, DEFAULT_CAPTURE_TIMEOUT};
pub use publish::{
    decode_frame_message, encode_frame_message, FrameMessage, FramePublisher, MemoryPublisher,
    MqttPublisher, MqttPublisherConfig, PublishedFrame,
};
