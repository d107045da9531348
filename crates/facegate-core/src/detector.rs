//! SCRFD face locator via ONNX Runtime.
//!
//! Runs the SCRFD detector (3-stride anchor-free decoding) on a grayscale
//! frame and post-filters its raw candidates with the active profile:
//!
//! - the scale factor sets the score floor (a finer search admits weaker
//!   candidates),
//! - overlapping candidates are grouped and a group needs `min_neighbors`
//!   members besides its strongest box,
//! - groups smaller than `min_size` are dropped.

use crate::capture::{CaptureError, FaceLocator};
use crate::policy::DetectionParams;
use crate::types::{FaceRegion, Frame};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// Candidates overlapping more than this belong to the same group.
const GROUP_IOU_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<DetectorError> for CaptureError {
    fn from(e: DetectorError) -> Self {
        CaptureError::Locator(e.to_string())
    }
}

/// Raw detector output in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    score: f32,
}

/// Maps letterboxed model coordinates back to the frame.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

pub struct ScrfdLocator {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdLocator {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "SCRFD model loaded"
        );

        Ok(Self {
            session,
            stride_indices,
        })
    }

    fn candidates(&mut self, frame: &Frame, floor: f32) -> Result<Vec<Candidate>, DetectorError> {
        let (input, letterbox) = preprocess(&frame.image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            all.extend(decode_stride(scores, bboxes, stride, &letterbox, floor));
        }
        Ok(all)
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(
        &mut self,
        frame: &Frame,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, CaptureError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let floor = score_floor(params.scale_factor);
        let candidates = self.candidates(frame, floor)?;
        let raw = candidates.len();

        let regions: Vec<FaceRegion> = group_candidates(candidates, params.min_neighbors)
            .into_iter()
            .filter(|c| {
                c.width >= params.min_size.0 as f32 && c.height >= params.min_size.1 as f32
            })
            .filter_map(|c| to_region(&c, frame.width(), frame.height()))
            .collect();

        tracing::trace!(raw, faces = regions.len(), floor, "faces located");
        Ok(regions)
    }
}

/// Score floor for a scale factor: 1.2 → 0.5, 1.1 → 0.25, 1.05 → 0.125.
fn score_floor(scale_factor: f32) -> f32 {
    ((scale_factor - 1.0) * 2.5).clamp(0.05, 0.95)
}

/// Letterbox a grayscale frame into the NCHW float tensor SCRFD expects.
fn preprocess(frame: &GrayImage) -> (Array4<f32>, LetterboxInfo) {
    let size = SCRFD_INPUT_SIZE;
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let resized = imageops::resize(frame, new_w as u32, new_h as u32, FilterType::Triangle);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let inside = (pad_y_start..pad_y_start + new_h).contains(&y)
                && (pad_x_start..pad_x_start + new_w).contains(&x);
            let pixel = if inside {
                resized.get_pixel((x - pad_x_start) as u32, (y - pad_y_start) as u32)[0] as f32
            } else {
                SCRFD_MEAN
            };
            let v = (pixel - SCRFD_MEAN) / SCRFD_STD;
            // Gray replicated to three channels.
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Locate score and bbox tensors by name (`score_8`, `bbox_16`, ...),
/// falling back to the usual positional layout: scores at 0-2, boxes at 3-5.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in named.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => *slot = (score, bbox),
            _ => {
                tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Decode the candidates of one stride level above `floor`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    floor: f32,
) -> Vec<Candidate> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= floor {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * step;
        let ay = (cell / grid_w) as f32 * step;

        let x1 = (ax - d[0] * step - letterbox.pad_x) / letterbox.scale;
        let y1 = (ay - d[1] * step - letterbox.pad_y) / letterbox.scale;
        let x2 = (ax + d[2] * step - letterbox.pad_x) / letterbox.scale;
        let y2 = (ay + d[3] * step - letterbox.pad_y) / letterbox.scale;

        out.push(Candidate {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
        });
    }
    out
}

/// Greedy grouping by overlap, strongest first. A group survives when at
/// least `min_neighbors` other candidates fell into it; the strongest box
/// represents it.
fn group_candidates(mut candidates: Vec<Candidate>, min_neighbors: u32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut taken = vec![false; candidates.len()];
    let mut kept = Vec::new();
    for i in 0..candidates.len() {
        if taken[i] {
            continue;
        }
        let mut neighbors = 0u32;
        for j in (i + 1)..candidates.len() {
            if !taken[j] && iou(&candidates[i], &candidates[j]) > GROUP_IOU_THRESHOLD {
                taken[j] = true;
                neighbors += 1;
            }
        }
        if neighbors >= min_neighbors {
            kept.push(candidates[i]);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Round to whole pixels and clip to the frame.
fn to_region(c: &Candidate, frame_width: u32, frame_height: u32) -> Option<FaceRegion> {
    let x1 = c.x.max(0.0).round() as u32;
    let y1 = c.y.max(0.0).round() as u32;
    let x2 = (c.x + c.width).max(0.0).round() as u32;
    let y2 = (c.y + c.height).max(0.0).round() as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    FaceRegion::new(x1, y1, x2 - x1, y2 - y1).clipped(frame_width, frame_height)
}
