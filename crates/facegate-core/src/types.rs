use image::GrayImage;
use serde::{Deserialize, Serialize};

/// A grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: GrayImage,
    /// Driver sequence number (0 when the source has none).
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        Self { image, sequence }
    }

    /// Wrap raw 8-bit grayscale bytes. Returns `None` if `data` is shorter
    /// than `width * height`.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Option<Self> {
        let pixels = (width as usize) * (height as usize);
        if data.len() < pixels {
            return None;
        }
        let mut data = data;
        data.truncate(pixels);
        GrayImage::from_raw(width, height, data).map(|image| Self { image, sequence })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Histogram-equalized copy of this frame. Detection and template
    /// extraction both run on the equalized image.
    pub fn equalized(&self) -> Frame {
        Frame {
            image: imageproc::contrast::equalize_histogram(&self.image),
            sequence: self.sequence,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with a `frame_width` × `frame_height` frame.
    /// Returns `None` when nothing of the region is left.
    pub fn clipped(&self, frame_width: u32, frame_height: u32) -> Option<FaceRegion> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(FaceRegion { x: self.x, y: self.y, width, height })
    }
}

/// An enrolled subject. Never mutated after enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub index: u32,
    pub display_name: String,
    pub external_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_gray_rejects_short_buffer() {
        assert!(Frame::from_gray(vec![0u8; 99], 10, 10, 0).is_none());
    }

    #[test]
    fn test_from_gray_truncates_long_buffer() {
        let frame = Frame::from_gray(vec![7u8; 120], 10, 10, 3).unwrap();
        assert_eq!(frame.image.as_raw().len(), 100);
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn test_equalized_spreads_two_level_frame() {
        // Left half dark, right half slightly brighter: equalization must
        // push the brighter half to full white.
        let data: Vec<u8> = (0..100).map(|i| if i % 10 < 5 { 40 } else { 60 }).collect();
        let frame = Frame::from_gray(data, 10, 10, 0).unwrap();
        let eq = frame.equalized();
        assert_eq!(eq.image.get_pixel(9, 0)[0], 255);
        assert!(eq.image.get_pixel(0, 0)[0] < 255);
    }

    #[test]
    fn test_region_clipped_inside() {
        let r = FaceRegion::new(10, 10, 20, 20);
        assert_eq!(r.clipped(100, 100), Some(r));
    }

    #[test]
    fn test_region_clipped_overhang() {
        let r = FaceRegion::new(90, 80, 20, 40);
        assert_eq!(r.clipped(100, 100), Some(FaceRegion::new(90, 80, 10, 20)));
    }

    #[test]
    fn test_region_clipped_outside() {
        assert_eq!(FaceRegion::new(100, 0, 5, 5).clipped(100, 100), None);
        assert_eq!(FaceRegion::new(0, 0, 0, 5).clipped(100, 100), None);
    }
}
