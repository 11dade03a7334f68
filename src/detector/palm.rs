use std::{cmp::Ordering, f32::consts::PI, path::Path, sync::LazyLock};

use anyhow::{Context, Result, anyhow};
use ort::session::Session;
use ort::value::Tensor;

use super::common::{HandRoi, LetterboxInfo, PALM_INPUT_SIZE, prepare_frame_with_size};
use crate::types::Frame;

const PALM_LANDMARKS: usize = 7;
const NMS_THRESHOLD: f32 = 0.3;
const TOP_K: usize = 32;

// SSD layout of the 192x192 palm model: one 24x24 layer and three 12x12
// layers sharing a stride, two anchors per layer and cell.
const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;
pub const NUM_ANCHORS: usize = 2016;

static ANCHORS: LazyLock<Vec<[f32; 2]>> = LazyLock::new(generate_anchors);

fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    let mut layer = 0;
    while layer < ANCHOR_STRIDES.len() {
        let stride = ANCHOR_STRIDES[layer];
        let mut per_cell = 0;
        while layer < ANCHOR_STRIDES.len() && ANCHOR_STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let cells = PALM_INPUT_SIZE.div_ceil(stride);
        for y in 0..cells {
            for x in 0..cells {
                let center = [
                    (x as f32 + 0.5) / cells as f32,
                    (y as f32 + 0.5) / cells as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

/// One palm found by the detector, in source-frame pixels.
#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}

pub struct PalmDetector {
    session: Session,
}

impl PalmDetector {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Returns palms scoring at least `score_threshold`, best first.
    pub fn detect(&mut self, frame: &Frame, score_threshold: f32) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = prepare_frame_with_size(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let box_and_landmarks = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;

        let box_shape = box_and_landmarks.shape().to_vec();
        let score_shape = scores.shape().to_vec();

        decode_palm_outputs(
            box_and_landmarks
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            &box_shape,
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            &score_shape,
            &letterbox,
            score_threshold,
        )
    }
}

fn decode_palm_outputs(
    box_landmark: &[f32],
    box_shape: &[usize],
    scores: &[f32],
    score_shape: &[usize],
    letterbox: &LetterboxInfo,
    score_threshold: f32,
) -> Result<Vec<PalmRegion>> {
    if box_shape.len() < 3 {
        return Err(anyhow!(
            "unexpected palm box shape {:?}, need [batch, anchors, features]",
            box_shape
        ));
    }
    if score_shape.len() < 3 {
        return Err(anyhow!(
            "unexpected palm score shape {:?}, need [batch, anchors, 1]",
            score_shape
        ));
    }

    let anchor_dim = box_shape[box_shape.len() - 2];
    let feature_dim = box_shape[box_shape.len() - 1];
    let score_anchor_dim = score_shape[score_shape.len() - 2];
    let score_feature_dim = score_shape[score_shape.len() - 1];

    if feature_dim < 4 + PALM_LANDMARKS * 2 {
        return Err(anyhow!("palm box feature dimension too small: {feature_dim}"));
    }
    if anchor_dim != score_anchor_dim {
        return Err(anyhow!(
            "anchor dimension mismatch between boxes ({anchor_dim}) and scores ({score_anchor_dim})"
        ));
    }

    let anchors = ANCHORS.len().min(anchor_dim);
    let pad_bias_x = letterbox.pad_x / letterbox.scale;
    let pad_bias_y = letterbox.pad_y / letterbox.scale;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let target_input = PALM_INPUT_SIZE as f32;

    let mut candidates = Vec::new();
    for (anchor_idx, anchor) in ANCHORS.iter().take(anchors).enumerate() {
        let raw_score = *scores
            .get(anchor_idx * score_feature_dim)
            .ok_or_else(|| anyhow!("missing score for palm anchor {anchor_idx}"))?;
        let score = sigmoid(raw_score);
        if score < score_threshold {
            continue;
        }

        let offset = anchor_idx * feature_dim;
        let features = box_landmark
            .get(offset..offset + 4 + PALM_LANDMARKS * 2)
            .ok_or_else(|| anyhow!("missing box features for anchor {anchor_idx}"))?;

        let cx = features[0] / target_input + anchor[0];
        let cy = features[1] / target_input + anchor[1];
        let hw = features[2] / target_input / 2.0;
        let hh = features[3] / target_input / 2.0;

        let mut bbox = [
            (cx - hw) * scale - pad_bias_x,
            (cy - hh) * scale - pad_bias_y,
            (cx + hw) * scale - pad_bias_x,
            (cy + hh) * scale - pad_bias_y,
        ];
        if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
            continue;
        }
        clamp_box(&mut bbox, letterbox.orig_w, letterbox.orig_h);

        let landmarks = features[4..]
            .chunks_exact(2)
            .map(|p| {
                (
                    (p[0] / target_input + anchor[0]) * scale - pad_bias_x,
                    (p[1] / target_input + anchor[1]) * scale - pad_bias_y,
                )
            })
            .collect();

        candidates.push(PalmRegion {
            bbox,
            landmarks,
            score,
        });
    }

    let kept = nms(&candidates, NMS_THRESHOLD, TOP_K);
    Ok(kept
        .into_iter()
        .map(|idx| candidates[idx].clone())
        .collect())
}

/// The rotated square the hand-pose model should look at for this palm.
pub fn roi_from_palm(region: &PalmRegion) -> HandRoi {
    let center = if region.landmarks.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        let (sum_x, sum_y) = region
            .landmarks
            .iter()
            .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        (
            sum_x / region.landmarks.len() as f32,
            sum_y / region.landmarks.len() as f32,
        )
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    let landmark_span = if region.landmarks.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region
            .landmarks
            .iter()
            .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
                (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
            });
        (max_x - min_x).max(max_y - min_y)
    };
    // Palms are much smaller than the whole hand.
    let side = base_w.max(base_h).max(landmark_span).max(80.0) * 2.4;

    HandRoi {
        center,
        side,
        angle: estimate_orientation(region),
    }
}

fn estimate_orientation(region: &PalmRegion) -> f32 {
    if region.landmarks.len() < 2 {
        return 0.0;
    }

    // Principal direction via simple 2x2 covariance eigvec
    let n = region.landmarks.len() as f32;
    let (cx, cy) = region
        .landmarks
        .iter()
        .fold((0.0_f32, 0.0_f32), |acc, (x, y)| (acc.0 + x, acc.1 + y));
    let mean = (cx / n, cy / n);

    let (mut cov_xx, mut cov_xy, mut cov_yy) = (0.0, 0.0, 0.0);
    for (x, y) in &region.landmarks {
        let dx = x - mean.0;
        let dy = y - mean.1;
        cov_xx += dx * dx;
        cov_xy += dx * dy;
        cov_yy += dy * dy;
    }
    cov_xx /= n;
    cov_xy /= n;
    cov_yy /= n;

    let trace = cov_xx + cov_yy;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let lambda1 = (trace * 0.5 + ((trace * 0.5).powi(2) - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if cov_xy.abs() > 1e-6 {
        (lambda1 - cov_yy, cov_xy)
    } else if cov_xx >= cov_yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}

fn nms(candidates: &[PalmRegion], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    'outer: for &idx in &order {
        for &k in &keep {
            if iou(&candidates[idx].bbox, &candidates[k].bbox) >= threshold {
                continue 'outer;
            }
        }
        keep.push(idx);
        if keep.len() >= top_k {
            break;
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn clamp_box(bbox: &mut [f32; 4], w: u32, h: u32) {
    let max_w = (w.saturating_sub(1)) as f32;
    let max_h = (h.saturating_sub(1)) as f32;
    bbox[0] = bbox[0].clamp(0.0, max_w);
    bbox[1] = bbox[1].clamp(0.0, max_h);
    bbox[2] = bbox[2].clamp(0.0, max_w);
    bbox[3] = bbox[3].clamp(0.0, max_h);
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    const FEATURES: usize = 4 + PALM_LANDMARKS * 2;

    fn square_letterbox(size: u32) -> LetterboxInfo {
        LetterboxInfo {
            scale: PALM_INPUT_SIZE as f32 / size as f32,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: size,
            orig_h: size,
        }
    }

    #[test]
    fn anchor_grid_matches_model_layout() {
        assert_eq!(ANCHORS.len(), NUM_ANCHORS);
        assert_abs_diff_eq!(ANCHORS[0][0], 0.5 / 24.0);
        assert_eq!(ANCHORS[0], ANCHORS[1]);
        // The first 12x12 anchor follows the 24x24 layer.
        assert_abs_diff_eq!(ANCHORS[24 * 24 * 2][0], 0.5 / 12.0);
        assert_eq!(ANCHORS[NUM_ANCHORS - 1], [11.5 / 12.0, 11.5 / 12.0]);
    }

    #[test]
    fn decodes_only_scores_above_threshold() {
        let mut boxes = vec![0.0_f32; NUM_ANCHORS * FEATURES];
        let mut scores = vec![-10.0_f32; NUM_ANCHORS];
        // A 48px palm centered on anchor 0.
        boxes[2] = 48.0;
        boxes[3] = 48.0;
        scores[0] = 2.0;

        let letterbox = square_letterbox(192);
        let regions = decode_palm_outputs(
            &boxes,
            &[1, NUM_ANCHORS, FEATURES],
            &scores,
            &[1, NUM_ANCHORS, 1],
            &letterbox,
            0.5,
        )
        .unwrap();

        assert_eq!(regions.len(), 1);
        assert!(regions[0].score > 0.85);
        assert_abs_diff_eq!(regions[0].bbox[2], 4.0 + 24.0, epsilon = 1e-3);
        assert_eq!(regions[0].landmarks.len(), PALM_LANDMARKS);

        let strict = decode_palm_outputs(
            &boxes,
            &[1, NUM_ANCHORS, FEATURES],
            &scores,
            &[1, NUM_ANCHORS, 1],
            &letterbox,
            0.9,
        )
        .unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let letterbox = square_letterbox(192);
        let err = decode_palm_outputs(&[], &[1, 10, FEATURES], &[], &[1, 12, 1], &letterbox, 0.5);
        assert!(err.is_err());
        let err = decode_palm_outputs(&[], &[10, FEATURES], &[], &[1, 10, 1], &letterbox, 0.5);
        assert!(err.is_err());
    }

    #[test]
    fn nms_keeps_best_of_overlapping() {
        let region = |x: f32, score: f32| PalmRegion {
            bbox: [x, 0.0, x + 10.0, 10.0],
            landmarks: Vec::new(),
            score,
        };
        let candidates = [region(0.0, 0.6), region(1.0, 0.9), region(50.0, 0.7)];
        assert_eq!(nms(&candidates, 0.3, 10), vec![1, 2]);
        assert_eq!(nms(&candidates, 0.3, 1), vec![1]);
    }

    #[test]
    fn roi_is_larger_than_palm() {
        let region = PalmRegion {
            bbox: [100.0, 100.0, 200.0, 200.0],
            landmarks: Vec::new(),
            score: 0.9,
        };
        let roi = roi_from_palm(&region);
        assert_eq!(roi.center, (150.0, 150.0));
        assert_abs_diff_eq!(roi.side, 240.0);
        assert_eq!(roi.angle, 0.0);
    }
}
