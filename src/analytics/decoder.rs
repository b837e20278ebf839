use std::cmp::Ordering;

use ndarray::{s, Array3, ArrayD, Axis, Ix3};
use serde::Serialize;
use thiserror::Error;

use super::label::HazardLabel;
use super::letterbox::Letterbox;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected output shape {0:?}: {1}")]
    Shape(Vec<usize>, &'static str),
    #[error("non-finite value in model output")]
    NonFinite,
}

/// A detection in original-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionBox {
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
    pub confidence: f32,
    pub label: HazardLabel,
}

/// A box already produced by the model, in model-input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

#[derive(Debug, Clone)]
pub enum RawOutput {
    /// Discrete boxes, NMS already applied by the model.
    Preboxed(Vec<RawBox>),
    /// Dense `[grid_h, grid_w, 5 + classes]` cells of
    /// `objectness, bx, by, bw, bh, p_0..p_n`.
    Grid(Array3<f32>),
}

impl RawOutput {
    /// Accepts `[1, n, 6]` or `[n, 6]` rows of `x1, y1, x2, y2, confidence, class`.
    pub fn preboxed_from_array(output: ArrayD<f32>) -> Result<Self, DecodeError> {
        let shape = output.shape().to_vec();
        let (n, cols) = match shape.as_slice() {
            [1, n, cols] | [n, cols] if *cols >= 6 => (*n, *cols),
            _ => return Err(DecodeError::Shape(shape, "expected [1, n, 6] boxes")),
        };
        let rows = output
            .into_shape_with_order((n, cols))
            .map_err(|_| DecodeError::Shape(shape.clone(), "not contiguous"))?;

        let mut boxes = Vec::with_capacity(rows.nrows());
        for row in rows.rows() {
            if row.iter().take(6).any(|v| !v.is_finite()) {
                return Err(DecodeError::NonFinite);
            }
            boxes.push(RawBox {
                x1: row[0],
                y1: row[1],
                x2: row[2],
                y2: row[3],
                confidence: row[4],
                class_id: row[5].max(0.0).round() as usize,
            });
        }

        Ok(RawOutput::Preboxed(boxes))
    }

    /// Accepts `[1, h, w, d]` or `[h, w, d]` with `d >= 6`.
    pub fn grid_from_array(output: ArrayD<f32>) -> Result<Self, DecodeError> {
        let shape = output.shape().to_vec();
        let grid = match shape.len() {
            4 if shape[0] == 1 => output.index_axis_move(Axis(0), 0),
            3 => output,
            _ => return Err(DecodeError::Shape(shape, "expected [1, h, w, 5 + classes]")),
        };
        let grid = grid
            .into_dimensionality::<Ix3>()
            .map_err(|_| DecodeError::Shape(shape.clone(), "expected three grid axes"))?;

        if grid.dim().2 < 6 {
            return Err(DecodeError::Shape(shape, "cell depth below 5 + 1 class"));
        }

        Ok(RawOutput::Grid(grid))
    }
}

#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Minimum confidence for preboxed detections.
    pub confidence_threshold: f32,
    /// Grid score threshold indexed by class id; ids past the end use the default.
    pub class_thresholds: Vec<f32>,
    pub default_class_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub class_names: Vec<String>,
}

impl DecodeParams {
    pub fn class_threshold(&self, class_id: usize) -> f32 {
        self.class_thresholds
            .get(class_id)
            .copied()
            .unwrap_or(self.default_class_threshold)
    }

    pub fn label(&self, class_id: usize) -> HazardLabel {
        self.class_names
            .get(class_id)
            .map(|name| HazardLabel::from_class_name(name))
            .unwrap_or(HazardLabel::None)
    }
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.45,
            class_thresholds: vec![0.15, 0.2, 0.1],
            default_class_threshold: 0.1,
            iou_threshold: 0.3,
            max_detections: 20,
            class_names: vec!["FIRE".into(), "FALL".into(), "NOT FALL".into()],
        }
    }
}

pub fn decode(
    raw: &RawOutput,
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Result<Vec<DetectionBox>, DecodeError> {
    match raw {
        RawOutput::Preboxed(boxes) => Ok(decode_preboxed(boxes, letterbox, params)),
        RawOutput::Grid(grid) => decode_grid(grid, letterbox, params),
    }
}

pub fn decode_preboxed(
    boxes: &[RawBox],
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Vec<DetectionBox> {
    boxes
        .iter()
        .filter(|b| b.confidence >= params.confidence_threshold)
        .map(|b| DetectionBox {
            bbox: letterbox.to_original_box(b.x1, b.y1, b.x2, b.y2),
            confidence: round_confidence(b.confidence),
            label: params.label(b.class_id),
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Normalized corners `x1, y1, x2, y2`.
    rect: [f32; 4],
    score: f32,
    class_id: usize,
}

pub fn decode_grid(
    grid: &Array3<f32>,
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Result<Vec<DetectionBox>, DecodeError> {
    let (grid_h, grid_w, depth) = grid.dim();
    if depth < 6 {
        return Err(DecodeError::Shape(vec![grid_h, grid_w, depth], "cell depth below 5 + 1 class"));
    }

    let mut candidates = Vec::new();

    for row in 0..grid_h {
        for col in 0..grid_w {
            let cell = grid.slice(s![row, col, ..]);

            let mut class_id = 0usize;
            let mut class_score = f32::NEG_INFINITY;
            for (j, &p) in cell.slice(s![5..]).iter().enumerate() {
                if p > class_score {
                    class_score = p;
                    class_id = j;
                }
            }

            let score = cell[0] * class_score;
            if !(score > params.class_threshold(class_id)) {
                continue;
            }

            let cx = (cell[1] + col as f32) / grid_w as f32;
            let cy = (cell[2] + row as f32) / grid_h as f32;
            let (w, h) = (cell[3], cell[4]);
            if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
                return Err(DecodeError::NonFinite);
            }

            candidates.push(Candidate {
                rect: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                score,
                class_id,
            });
        }
    }

    let size = letterbox.target as f32;
    let detections = non_max_suppression(candidates, params.iou_threshold, params.max_detections)
        .into_iter()
        .map(|c| {
            let [x1, y1, x2, y2] = c.rect;
            DetectionBox {
                bbox: letterbox.to_original_box(x1 * size, y1 * size, x2 * size, y2 * size),
                confidence: round_confidence(c.score),
                label: params.label(c.class_id),
            }
        })
        .collect();

    Ok(detections)
}

/// Greedy suppression by descending score. Equal scores keep cell order.
fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_output: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_output {
            break;
        }
        if kept.iter().all(|k| iou(&k.rect, &candidate.rect) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn round_confidence(score: f32) -> f32 {
    (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

/// FIRE beats FALL when both appear in one frame.
pub fn resolve_frame_label(detections: &[DetectionBox]) -> HazardLabel {
    if detections.iter().any(|d| d.label == HazardLabel::Fire) {
        HazardLabel::Fire
    } else if detections.iter().any(|d| d.label == HazardLabel::Fall) {
        HazardLabel::Fall
    } else {
        HazardLabel::None
    }
}
