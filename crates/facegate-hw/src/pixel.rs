//! Raw V4L2 buffer → 8-bit grayscale conversion.

use thiserror::Error;

/// Pixel formats the camera can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; the Y bytes are the grayscale image.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PixelError {
    #[error("{format:?} buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Convert one raw buffer of `width` × `height` pixels to grayscale.
/// Trailing bytes past the image are ignored.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, PixelError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(PixelError::ShortBuffer {
            format,
            expected,
            actual: buf.len(),
        });
    }
    let buf = &buf[..expected];

    Ok(match format {
        PixelFormat::Grey => buf.to_vec(),
        PixelFormat::Yuyv => buf.iter().step_by(2).copied().collect(),
        // Little-endian: the high byte is the second of each pair.
        PixelFormat::Y16 => buf.chunks_exact(2).map(|px| px[1]).collect(),
    })
}
