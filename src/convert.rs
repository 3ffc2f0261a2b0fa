//! Frame converter.
//!
//! Owns one reusable output buffer and converts raw capture formats into the
//! fixed RGBA8 output format. The buffer is reallocated only when the
//! incoming geometry or source format changes, so the steady-state cost of a
//! cycle is a single conversion pass with no allocation.
//!
//! Contract:
//! - `ensure_size` must succeed for a raw frame's exact geometry/format
//!   before `convert` will accept it.
//! - The view returned by `convert` aliases the internal buffer and is
//!   invalidated by the next `convert` call; callers finish publishing it
//!   before the next cycle.

use crate::capture::{PixelFormat, RawFrame};
use crate::error::ConvertError;

/// Fixed output pixel format for every published frame.
pub const OUTPUT_FORMAT: PixelFormat = PixelFormat::Rgba8;

const OUTPUT_BYTES_PER_PIXEL: usize = 4;

/// Read-only view over the converter's internal buffer.
///
/// Valid until the next `convert` call.
pub struct ConvertedFrameView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> ConvertedFrameView<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Converter with one reusable output buffer.
pub struct FrameConverter {
    buf: Vec<u8>,
    /// Geometry and source format of the current allocation, `None` until the
    /// first successful `ensure_size`.
    sized_for: Option<(u32, u32, PixelFormat)>,
}

impl FrameConverter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            sized_for: None,
        }
    }

    /// (Re)allocate the output buffer for the given source geometry/format.
    ///
    /// No-op when the requested size matches the current allocation; the
    /// existing buffer (and its contents) are kept as-is.
    pub fn ensure_size(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), ConvertError> {
        if self.sized_for == Some((width, height, format)) {
            return Ok(());
        }

        let needed = width as usize * height as usize * OUTPUT_BYTES_PER_PIXEL;
        self.buf.clear();
        self.buf.try_reserve_exact(needed)?;
        self.buf.resize(needed, 0);
        self.sized_for = Some((width, height, format));

        log::debug!("FrameConverter: sized for {}x{} {:?}", width, height, format);
        Ok(())
    }

    /// Convert `raw` into RGBA8, writing into the internal buffer.
    ///
    /// Requires a prior `ensure_size` matching `raw`'s geometry and format.
    pub fn convert(&mut self, raw: &RawFrame) -> Result<ConvertedFrameView<'_>, ConvertError> {
        let Some((width, height, format)) = self.sized_for else {
            return Err(ConvertError::SizeMismatch {
                expected_width: 0,
                expected_height: 0,
                expected_format: OUTPUT_FORMAT,
                width: raw.width,
                height: raw.height,
                format: raw.format,
            });
        };
        if (raw.width, raw.height, raw.format) != (width, height, format) {
            return Err(ConvertError::SizeMismatch {
                expected_width: width,
                expected_height: height,
                expected_format: format,
                width: raw.width,
                height: raw.height,
                format: raw.format,
            });
        }

        let expected = raw
            .format
            .frame_len(raw.width, raw.height)
            .ok_or(ConvertError::UnsupportedFormat(raw.format))?;
        let src = raw.bytes();
        if src.len() != expected {
            return Err(ConvertError::BufferLength {
                expected,
                actual: src.len(),
                width: raw.width,
                height: raw.height,
                format: raw.format,
            });
        }

        match raw.format {
            PixelFormat::Rgba8 => self.buf.copy_from_slice(src),
            PixelFormat::Rgb24 => rgb24_to_rgba(src, &mut self.buf),
            PixelFormat::Nv12 => {
                // Chroma is subsampled 2x2; odd geometry has no complete UV
                // pair for the last row/column.
                if raw.width % 2 != 0 || raw.height % 2 != 0 {
                    return Err(ConvertError::UnsupportedFormat(raw.format));
                }
                nv12_to_rgba(src, &mut self.buf, raw.width, raw.height);
            }
            PixelFormat::Yuyv => {
                if raw.width % 2 != 0 {
                    return Err(ConvertError::UnsupportedFormat(raw.format));
                }
                yuyv_to_rgba(src, &mut self.buf);
            }
            PixelFormat::Mjpeg => return Err(ConvertError::UnsupportedFormat(raw.format)),
        }

        Ok(ConvertedFrameView {
            data: &self.buf,
            width,
            height,
        })
    }
}

impl Default for FrameConverter {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Conversion kernels
// ----------------------------------------------------------------------------

fn rgb24_to_rgba(src: &[u8], dst: &mut [u8]) {
    for (rgb, rgba) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
        rgba[0] = rgb[0];
        rgba[1] = rgb[1];
        rgba[2] = rgb[2];
        rgba[3] = 255;
    }
}

fn nv12_to_rgba(src: &[u8], dst: &mut [u8], width: u32, height: u32) {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    for j in 0..h {
        for i in 0..w {
            let y = src[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = src[uv_index] as f32 - 128.0;
            let v = src[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 4;
            write_yuv_pixel(&mut dst[offset..offset + 4], y, u, v);
        }
    }
}

fn yuyv_to_rgba(src: &[u8], dst: &mut [u8]) {
    // Each 4-byte group [Y0 U Y1 V] carries two pixels sharing chroma.
    for (group, rgba) in src.chunks_exact(4).zip(dst.chunks_exact_mut(8)) {
        let u = group[1] as f32 - 128.0;
        let v = group[3] as f32 - 128.0;
        write_yuv_pixel(&mut rgba[0..4], group[0] as f32, u, v);
        write_yuv_pixel(&mut rgba[4..8], group[2] as f32, u, v);
    }
}

fn write_yuv_pixel(rgba: &mut [u8], y: f32, u: f32, v: f32) {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;

    rgba[0] = clamp_to_u8(r);
    rgba[1] = clamp_to_u8(g);
    rgba[2] = clamp_to_u8(b);
    rgba[3] = 255;
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(width: u32, height: u32) -> RawFrame {
        let data = vec![7u8; (width * height * 3) as usize];
        RawFrame::new(data, width, height, PixelFormat::Rgb24)
    }

    #[test]
    fn rgb_converts_to_opaque_rgba() -> anyhow::Result<()> {
        let mut converter = FrameConverter::new();
        let raw = rgb_frame(2, 2);

        converter.ensure_size(2, 2, PixelFormat::Rgb24)?;
        let view = converter.convert(&raw)?;

        assert_eq!(view.width(), 2);
        assert_eq!(view.height(), 2);
        assert_eq!(view.data().len(), 16);
        assert_eq!(&view.data()[..4], &[7, 7, 7, 255]);

        Ok(())
    }

    #[test]
    fn nv12_gray_converts_to_gray_rgba() -> anyhow::Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let raw = RawFrame::new([y_plane, uv_plane].concat(), 2, 2, PixelFormat::Nv12);

        let mut converter = FrameConverter::new();
        converter.ensure_size(2, 2, PixelFormat::Nv12)?;
        let view = converter.convert(&raw)?;

        for pixel in view.data().chunks_exact(4) {
            assert_eq!(pixel, &[128, 128, 128, 255]);
        }

        Ok(())
    }

    #[test]
    fn nv12_odd_geometry_is_rejected() -> anyhow::Result<()> {
        let mut converter = FrameConverter::new();
        converter.ensure_size(3, 1, PixelFormat::Nv12)?;

        // 3x1 passes the length gate (3 luma bytes + 1 chroma byte) but the
        // third column has no complete UV pair.
        let raw = RawFrame::new(vec![128u8; 4], 3, 1, PixelFormat::Nv12);
        let err = converter.convert(&raw).err().expect("odd nv12 must fail");
        assert!(matches!(
            err,
            ConvertError::UnsupportedFormat(PixelFormat::Nv12)
        ));

        converter.ensure_size(2, 3, PixelFormat::Nv12)?;
        let raw = RawFrame::new(vec![128u8; 9], 2, 3, PixelFormat::Nv12);
        assert!(converter.convert(&raw).is_err());

        Ok(())
    }

    #[test]
    fn yuyv_gray_converts_to_gray_rgba() -> anyhow::Result<()> {
        // Two pixels: Y=200 with neutral chroma.
        let raw = RawFrame::new(vec![200, 128, 200, 128], 2, 1, PixelFormat::Yuyv);

        let mut converter = FrameConverter::new();
        converter.ensure_size(2, 1, PixelFormat::Yuyv)?;
        let view = converter.convert(&raw)?;

        assert_eq!(view.data(), &[200, 200, 200, 255, 200, 200, 200, 255]);
        Ok(())
    }

    #[test]
    fn repeated_ensure_size_is_a_noop() -> anyhow::Result<()> {
        let mut converter = FrameConverter::new();
        let raw = rgb_frame(4, 4);

        converter.ensure_size(4, 4, PixelFormat::Rgb24)?;
        let first_ptr = converter.convert(&raw)?.data().as_ptr();

        // Second ensure_size with identical parameters must keep the same
        // allocation.
        converter.ensure_size(4, 4, PixelFormat::Rgb24)?;
        let second_ptr = converter.convert(&raw)?.data().as_ptr();

        assert_eq!(first_ptr, second_ptr);
        Ok(())
    }

    #[test]
    fn geometry_change_resizes_then_stale_convert_fails() -> anyhow::Result<()> {
        let mut converter = FrameConverter::new();

        converter.ensure_size(640, 480, PixelFormat::Rgb24)?;
        converter.convert(&rgb_frame(640, 480))?;

        // Device renegotiated to 1280x720.
        converter.ensure_size(1280, 720, PixelFormat::Rgb24)?;
        let view = converter.convert(&rgb_frame(1280, 720))?;
        assert_eq!((view.width(), view.height()), (1280, 720));

        // A further size change without ensure_size must be rejected.
        let err = converter
            .convert(&rgb_frame(1920, 1080))
            .err()
            .expect("stale convert must fail");
        assert!(matches!(err, ConvertError::SizeMismatch { .. }));

        Ok(())
    }

    #[test]
    fn convert_before_ensure_size_fails() {
        let mut converter = FrameConverter::new();
        let err = converter
            .convert(&rgb_frame(2, 2))
            .err()
            .expect("convert without ensure_size must fail");
        assert!(matches!(err, ConvertError::SizeMismatch { .. }));
    }

    #[test]
    fn mjpeg_is_unsupported() -> anyhow::Result<()> {
        let mut converter = FrameConverter::new();
        converter.ensure_size(2, 2, PixelFormat::Mjpeg)?;

        let raw = RawFrame::new(vec![0u8; 10], 2, 2, PixelFormat::Mjpeg);
        let err = converter.convert(&raw).err().expect("mjpeg must fail");
        assert!(matches!(err, ConvertError::UnsupportedFormat(_)));
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() -> anyhow::Result<()> {
        let mut converter = FrameConverter::new();
        converter.ensure_size(2, 2, PixelFormat::Rgb24)?;

        let raw = RawFrame::new(vec![0u8; 5], 2, 2, PixelFormat::Rgb24);
        let err = converter.convert(&raw).err().expect("short buffer");
        assert!(matches!(err, ConvertError::BufferLength { .. }));
        Ok(())
    }
}
