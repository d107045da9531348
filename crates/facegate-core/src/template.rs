//! Fixed-size grayscale face templates.
//!
//! Every template is exactly [`TEMPLATE_SIDE`] × [`TEMPLATE_SIDE`] pixels,
//! cut from a histogram-equalized frame and resized bilinearly, so any two
//! templates can be compared pixel by pixel.

use crate::types::{FaceRegion, Frame};
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TEMPLATE_SIDE: u32 = 100;
pub const TEMPLATE_PIXELS: usize = (TEMPLATE_SIDE * TEMPLATE_SIDE) as usize;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template must hold {TEMPLATE_PIXELS} pixels, got {0}")]
    WrongSize(usize),
}

/// A normalized face sample used as a matching reference.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Template {
    pixels: Vec<u8>,
}

impl Template {
    pub fn from_pixels(pixels: Vec<u8>) -> Result<Self, TemplateError> {
        if pixels.len() != TEMPLATE_PIXELS {
            return Err(TemplateError::WrongSize(pixels.len()));
        }
        Ok(Self { pixels })
    }

    /// A template with every pixel set to `value`.
    pub fn uniform(value: u8) -> Self {
        Self { pixels: vec![value; TEMPLATE_PIXELS] }
    }

    /// Cut `region` out of an already equalized frame and scale it to the
    /// template size. Returns `None` if the region lies outside the frame.
    pub fn from_region(frame: &Frame, region: &FaceRegion) -> Option<Self> {
        let region = region.clipped(frame.width(), frame.height())?;
        let crop =
            imageops::crop_imm(&frame.image, region.x, region.y, region.width, region.height)
                .to_image();
        let resized = imageops::resize(&crop, TEMPLATE_SIDE, TEMPLATE_SIDE, FilterType::Triangle);
        Some(Self { pixels: resized.into_raw() })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mean absolute per-pixel intensity difference, in `[0, 255]`.
    pub fn mean_abs_diff(&self, other: &Template) -> f32 {
        let total: u64 = self
            .pixels
            .iter()
            .zip(other.pixels.iter())
            .map(|(&a, &b)| u64::from(a.abs_diff(b)))
            .sum();
        total as f32 / TEMPLATE_PIXELS as f32
    }
}

impl TryFrom<Vec<u8>> for Template {
    type Error = TemplateError;

    fn try_from(pixels: Vec<u8>) -> Result<Self, Self::Error> {
        Template::from_pixels(pixels)
    }
}

impl From<Template> for Vec<u8> {
    fn from(t: Template) -> Self {
        t.pixels
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mean = self.pixels.iter().map(|&p| u64::from(p)).sum::<u64>() as f32
            / TEMPLATE_PIXELS as f32;
        write!(f, "Template({TEMPLATE_SIDE}x{TEMPLATE_SIDE}, mean={mean:.1})")
    }
}
