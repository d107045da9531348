//! facegate-hw — V4L2 camera frame source.

pub mod camera;
pub mod pixel;

pub use camera::{Camera, CameraError};
pub use pixel::PixelFormat;
