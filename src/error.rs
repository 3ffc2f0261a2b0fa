//! Error types for the acquisition pipeline.
//!
//! Two tiers map onto two enums:
//! - `CaptureError`: device-facing failures. `DeviceOpen` is fatal at setup
//!   time; `Timeout` and `Device` are transient and abort only one cycle.
//! - `ConvertError`: buffer/format contract violations inside the converter.
//!   All variants are transient from the loop's point of view.
//!
//! Transport errors stay opaque (`anyhow::Error`) since the wire encoding is
//! the transport layer's business.

use std::collections::TryReserveError;
use std::time::Duration;
use thiserror::Error;

use crate::capture::PixelFormat;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The resource could not be resolved or the device session could not
    /// start. Unrecoverable for the process.
    #[error("failed to open capture device {resource}: {reason}")]
    DeviceOpen { resource: String, reason: String },

    /// No frame arrived within the bounded wait. The loop retries next cycle.
    #[error("no frame received within {timeout:?}")]
    Timeout { timeout: Duration },

    /// Lower-level device fault. The loop retries next cycle.
    #[error("capture device fault: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    /// The internal output buffer could not be (re)allocated.
    #[error("output buffer allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// `convert` was called without a matching `ensure_size`.
    #[error(
        "converter sized for {expected_width}x{expected_height} {expected_format:?}, \
         raw frame is {width}x{height} {format:?}"
    )]
    SizeMismatch {
        expected_width: u32,
        expected_height: u32,
        expected_format: PixelFormat,
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    /// No conversion kernel exists for this source pixel format.
    #[error("unsupported source pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),

    /// The raw buffer length does not match its declared geometry/format.
    #[error("raw buffer is {actual} bytes, expected {expected} for {width}x{height} {format:?}")]
    BufferLength {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
}
