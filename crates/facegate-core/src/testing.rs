//! Scripted collaborators for loop and enrollment tests.

use crate::capture::{CaptureError, FaceLocator, FrameSource};
use crate::policy::DetectionParams;
use crate::template::Template;
use crate::types::{FaceRegion, Frame};
use image::{GrayImage, Luma};
use std::collections::VecDeque;

pub const FACE: FaceRegion = FaceRegion {
    x: 40,
    y: 20,
    width: 60,
    height: 60,
};

pub const OTHER_FACE: FaceRegion = FaceRegion {
    x: 100,
    y: 50,
    width: 50,
    height: 50,
};

/// A 160×120 diagonal gradient, so equalization has something to do.
pub fn gradient_frame(sequence: u32) -> Frame {
    let image = GrayImage::from_fn(160, 120, |x, y| Luma([((x * 2 + y) % 256) as u8]));
    Frame::new(image, sequence)
}

/// The template the loop extracts from `frame` at `region`.
pub fn probe_of(frame: &Frame, region: &FaceRegion) -> Template {
    Template::from_region(&frame.equalized(), region).unwrap()
}

/// A template whose mean absolute difference from `t` is exactly `delta`.
pub fn shifted(t: &Template, delta: u8) -> Template {
    assert!(delta <= 127);
    let pixels = t
        .pixels()
        .iter()
        .map(|&p| if p >= delta { p - delta } else { p + delta })
        .collect();
    Template::from_pixels(pixels).unwrap()
}

pub struct ScriptedSource {
    script: VecDeque<Result<Frame, CaptureError>>,
    fallback: Option<Frame>,
    pub pulled: usize,
}

impl ScriptedSource {
    /// Returns clones of `frame` forever once the script is exhausted.
    pub fn repeating(frame: Frame) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Some(frame),
            pulled: 0,
        }
    }

    /// Fails every read once the script is exhausted.
    pub fn dead() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: None,
            pulled: 0,
        }
    }

    pub fn then_frame(mut self, frame: Frame) -> Self {
        self.script.push_back(Ok(frame));
        self
    }

    pub fn then_failure(mut self) -> Self {
        self.script
            .push_back(Err(CaptureError::Frame("read timed out".into())));
        self
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.pulled += 1;
        match self.script.pop_front() {
            Some(next) => next,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| CaptureError::Frame("no signal".into())),
        }
    }
}

pub struct ScriptedLocator {
    script: VecDeque<Vec<FaceRegion>>,
    fallback: Vec<FaceRegion>,
    /// Parameters of every call, in order.
    pub calls: Vec<DetectionParams>,
}

impl ScriptedLocator {
    pub fn always(regions: &[FaceRegion]) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: regions.to_vec(),
            calls: Vec::new(),
        }
    }

    pub fn then(mut self, regions: &[FaceRegion]) -> Self {
        self.script.push_back(regions.to_vec());
        self
    }
}

impl FaceLocator for ScriptedLocator {
    fn locate(
        &mut self,
        _frame: &Frame,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, CaptureError> {
        self.calls.push(*params);
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
