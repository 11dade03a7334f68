use std::f32::consts::FRAC_PI_2;

use anyhow::{Context, Result, anyhow};
use ort::session::Session;
use ort::value::Tensor;

use super::common::{self, HANDPOSE_INPUT_SIZE, HandRoi};
use crate::types::{Frame, HandLandmarks, Handedness, Landmark, NUM_LANDMARKS};

const WRIST: usize = 0;
const MIDDLE_MCP: usize = 9;
// Landmark bounding boxes hug the fingertips; the model wants some margin.
const ROI_SCALE: f32 = 2.0;

#[derive(Clone, Debug)]
pub struct HandEstimate {
    pub hand: HandLandmarks,
    /// Landmarks in source-frame pixels, used to track the hand next frame.
    pub pixels: Vec<(f32, f32)>,
}

pub struct HandposeEstimator {
    session: Session,
}

impl HandposeEstimator {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn estimate(&mut self, frame: &Frame, roi: HandRoi) -> Result<HandEstimate> {
        let (input, transform) = common::prepare_rotated_crop(frame, roi, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let raw = common::decode_landmarks(&flattened)?;

        let first_value = |idx: usize| {
            if outputs.len() > idx {
                outputs[idx]
                    .try_extract_array::<f32>()
                    .ok()
                    .and_then(|arr| arr.iter().next().copied())
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        };
        let presence = first_value(1).clamp(0.0, 1.0);
        let handedness = first_value(2);

        let depth_scale = roi.side / HANDPOSE_INPUT_SIZE as f32 / frame.width as f32;
        let pixels: Vec<(f32, f32)> = raw
            .iter()
            .map(|p| transform.project(p[0], p[1]))
            .collect();

        let mut points = [Landmark::default(); NUM_LANDMARKS];
        for ((point, (px, py)), r) in points.iter_mut().zip(&pixels).zip(&raw) {
            *point = Landmark {
                x: px / frame.width as f32,
                y: py / frame.height as f32,
                z: r[2] * depth_scale,
            };
        }

        Ok(HandEstimate {
            hand: HandLandmarks {
                points,
                handedness: Handedness::from_score(handedness),
                presence,
            },
            pixels,
        })
    }
}

/// Derives the crop for the next frame from a tracked hand: centred on the
/// landmark bounds and rotated so the wrist-to-middle-knuckle axis points up.
pub fn roi_from_landmarks(pixels: &[(f32, f32)]) -> Option<HandRoi> {
    if pixels.len() <= MIDDLE_MCP {
        return None;
    }

    let (min_x, max_x, min_y, max_y) = pixels
        .iter()
        .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
            (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
        });
    let side = (max_x - min_x).max(max_y - min_y) * ROI_SCALE;
    if side <= 1.0 {
        return None;
    }

    let (wx, wy) = pixels[WRIST];
    let (mx, my) = pixels[MIDDLE_MCP];
    let angle = (my - wy).atan2(mx - wx) + FRAC_PI_2;

    Some(HandRoi {
        center: ((min_x + max_x) * 0.5, (min_y + max_y) * 0.5),
        side,
        angle,
    })
}

/// Whether two crops are looking at the same hand.
pub fn rois_overlap(a: &HandRoi, b: &HandRoi) -> bool {
    let dx = a.center.0 - b.center.0;
    let dy = a.center.1 - b.center.1;
    (dx * dx + dy * dy).sqrt() < a.side.max(b.side) * 0.5
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn upright_hand() -> Vec<(f32, f32)> {
        // Wrist at the bottom, middle knuckle straight above it.
        let mut pixels = vec![(100.0, 100.0); NUM_LANDMARKS];
        pixels[WRIST] = (100.0, 150.0);
        pixels[MIDDLE_MCP] = (100.0, 100.0);
        pixels[12] = (100.0, 50.0);
        pixels[4] = (70.0, 110.0);
        pixels[20] = (130.0, 90.0);
        pixels
    }

    #[test]
    fn upright_hand_needs_no_rotation() {
        let roi = roi_from_landmarks(&upright_hand()).unwrap();
        assert_abs_diff_eq!(roi.angle, 0.0, epsilon = 1e-5);
        assert_eq!(roi.center, (100.0, 100.0));
        assert_abs_diff_eq!(roi.side, 200.0);
    }

    #[test]
    fn sideways_hand_is_rotated() {
        let pixels: Vec<(f32, f32)> = upright_hand()
            .into_iter()
            .map(|(x, y)| (200.0 - y, x))
            .collect();
        let roi = roi_from_landmarks(&pixels).unwrap();
        // Fingers now point to the right.
        assert_abs_diff_eq!(roi.angle, FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn degenerate_hands_have_no_roi() {
        assert!(roi_from_landmarks(&[(1.0, 1.0); 5]).is_none());
        assert!(roi_from_landmarks(&[(1.0, 1.0); NUM_LANDMARKS]).is_none());
    }

    #[test]
    fn overlap_uses_larger_crop() {
        let a = HandRoi {
            center: (0.0, 0.0),
            side: 100.0,
            angle: 0.0,
        };
        let near = HandRoi {
            center: (30.0, 0.0),
            side: 20.0,
            angle: 0.0,
        };
        let far = HandRoi {
            center: (80.0, 0.0),
            ..near
        };
        assert!(rois_overlap(&a, &near));
        assert!(!rois_overlap(&a, &far));
    }
}
