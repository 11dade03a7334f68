use std::time::{Duration, Instant};

pub const NUM_LANDMARKS: usize = 21;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

/// A landmark in normalized image coordinates: `x` and `y` are in `[0, 1]`
/// relative to the frame the detector saw, `z` is depth relative to the wrist.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HandLandmarks {
    pub points: [Landmark; NUM_LANDMARKS],
    pub handedness: Handedness,
    /// Hand presence score reported by the estimator.
    pub presence: f32,
}

/// Every hand found in one frame. Only one set is live at a time; a new
/// detection replaces the previous one wholesale.
#[derive(Clone, Debug, Default)]
pub struct LandmarkSet {
    pub hands: Vec<HandLandmarks>,
}

impl LandmarkSet {
    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ResultBundle {
    pub landmarks: LandmarkSet,
    pub inference_time: Duration,
    pub input_width: u32,
    pub input_height: u32,
    pub timestamp: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Other,
    GpuUnavailable,
}

#[derive(Clone, Debug)]
pub enum DetectorEvent {
    Results(ResultBundle),
    Error { message: String, kind: ErrorKind },
}

/// A landmark set together with the size of the frame it was found in.
#[derive(Clone, Debug)]
pub struct CapturedLandmarks {
    pub landmarks: LandmarkSet,
    pub width: u32,
    pub height: u32,
}

/// The landmark set retained to annotate the next captured photo.
#[derive(Clone, Debug, Default)]
pub struct CaptureResult {
    latest: Option<CapturedLandmarks>,
}

impl CaptureResult {
    pub fn record(&mut self, bundle: &ResultBundle) {
        if !bundle.landmarks.is_empty() {
            self.latest = Some(CapturedLandmarks {
                landmarks: bundle.landmarks.clone(),
                width: bundle.input_width,
                height: bundle.input_height,
            });
        }
    }

    pub fn latest(&self) -> Option<&CapturedLandmarks> {
        self.latest.as_ref()
    }

    pub fn clear(&mut self) {
        self.latest = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn hand_from_fn(f: impl Fn(usize) -> (f32, f32)) -> HandLandmarks {
        let mut points = [Landmark::default(); NUM_LANDMARKS];
        for (idx, point) in points.iter_mut().enumerate() {
            let (x, y) = f(idx);
            *point = Landmark::new(x, y);
        }
        HandLandmarks {
            points,
            handedness: Handedness::Right,
            presence: 0.9,
        }
    }

    fn bundle(hands: Vec<HandLandmarks>) -> ResultBundle {
        ResultBundle {
            landmarks: LandmarkSet { hands },
            inference_time: Duration::from_millis(12),
            input_width: 640,
            input_height: 480,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn capture_result_keeps_last_detection() {
        let mut capture = CaptureResult::default();
        assert!(capture.latest().is_none());

        capture.record(&bundle(vec![hand_from_fn(|_| (0.1, 0.1))]));
        capture.record(&bundle(vec![hand_from_fn(|_| (0.7, 0.2))]));
        let latest = capture.latest().unwrap();
        assert_eq!((latest.width, latest.height), (640, 480));
        assert_eq!(latest.landmarks.hands.len(), 1);
        assert_eq!(latest.landmarks.hands[0].points[0], Landmark::new(0.7, 0.2));
    }

    #[test]
    fn empty_detection_does_not_erase_capture_result() {
        let mut capture = CaptureResult::default();
        capture.record(&bundle(vec![hand_from_fn(|_| (0.5, 0.5))]));
        capture.record(&bundle(Vec::new()));
        assert!(capture.latest().is_some());
    }

    #[test]
    fn handedness_threshold() {
        assert_eq!(Handedness::from_score(0.8), Handedness::Right);
        assert_eq!(Handedness::from_score(0.2), Handedness::Left);
    }
}
