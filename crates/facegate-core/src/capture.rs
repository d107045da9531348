//! Seams to the external collaborators: frame source and face locator.

use crate::policy::DetectionParams;
use crate::types::{FaceRegion, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame source: {0}")]
    Frame(String),
    #[error("face locator: {0}")]
    Locator(String),
}

/// Supplies one grayscale frame per call. Failures are expected to be
/// transient; callers retry on the next cycle.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Finds face regions in an equalized grayscale frame.
pub trait FaceLocator {
    fn locate(
        &mut self,
        frame: &Frame,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, CaptureError>;
}
