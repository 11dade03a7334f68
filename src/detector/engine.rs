use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use anyhow::Result;
use ort::session::{
    Session,
    builder::{GraphOptimizationLevel, SessionBuilder},
};

use super::{
    DetectorError, HandLandmarker, LandmarkerFactory,
    common::HandRoi,
    handpose::{HandposeEstimator, roi_from_landmarks, rois_overlap},
    palm::{PalmDetector, roi_from_palm},
};
use crate::{
    model_download::ModelKind,
    settings::{Delegate, DetectorConfig, Threshold},
    types::{Frame, LandmarkSet},
};

/// Builds [`OrtLandmarker`]s from the two ONNX models in `model_dir`.
#[derive(Clone, Debug)]
pub struct OrtLandmarkerFactory {
    model_dir: PathBuf,
}

impl OrtLandmarkerFactory {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn palm_detector_model_path(&self) -> PathBuf {
        ModelKind::PalmDetector.path_in(&self.model_dir)
    }

    pub fn handpose_estimator_model_path(&self) -> PathBuf {
        ModelKind::HandposeEstimator.path_in(&self.model_dir)
    }
}

impl LandmarkerFactory for OrtLandmarkerFactory {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn HandLandmarker>, DetectorError> {
        let palm_path = self.palm_detector_model_path();
        let handpose_path = self.handpose_estimator_model_path();

        let palm = load_session(&palm_path, config.delegate)?;
        let handpose = load_session(&handpose_path, config.delegate)?;
        log::info!(
            "hand landmarker ready on {} using {} and {}",
            config.delegate.label(),
            handpose_path.display(),
            palm_path.display()
        );

        Ok(Box::new(OrtLandmarker {
            palm: PalmDetector::new(palm),
            handpose: HandposeEstimator::new(handpose),
            config: *config,
            tracked: Vec::new(),
        }))
    }
}

fn base_builder() -> Result<SessionBuilder> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?)
}

fn load_session(path: &Path, delegate: Delegate) -> Result<Session, DetectorError> {
    let builder = base_builder().map_err(|err| DetectorError::model_load(path, err))?;
    let builder = match delegate {
        Delegate::Cpu => builder,
        Delegate::Gpu => with_gpu(builder)?,
    };
    builder
        .commit_from_file(path)
        .map_err(|err| DetectorError::model_load(path, err))
}

#[cfg(feature = "gpu-delegate")]
fn with_gpu(builder: SessionBuilder) -> Result<SessionBuilder, DetectorError> {
    use ort::execution_providers::CUDAExecutionProvider;

    builder
        .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
        .map_err(|err| DetectorError::GpuUnavailable(err.to_string()))
}

#[cfg(not(feature = "gpu-delegate"))]
fn with_gpu(_builder: SessionBuilder) -> Result<SessionBuilder, DetectorError> {
    Err(DetectorError::GpuUnavailable(
        "built without the gpu-delegate feature".into(),
    ))
}

/// Palm detection followed by per-hand landmark estimation. Hands whose
/// presence clears the tracking threshold are re-cropped from their own
/// landmarks on the next frame instead of running the palm detector again.
pub struct OrtLandmarker {
    palm: PalmDetector,
    handpose: HandposeEstimator,
    config: DetectorConfig,
    tracked: Vec<HandRoi>,
}

impl HandLandmarker for OrtLandmarker {
    fn detect(&mut self, frame: &Frame) -> Result<LandmarkSet> {
        let max_hands = self.config.max_hands();
        let mut rois = std::mem::take(&mut self.tracked);
        rois.truncate(max_hands);

        if rois.len() < max_hands {
            let palms = self
                .palm
                .detect(frame, self.config.confidence(Threshold::Detection))?;
            for palm in palms {
                if rois.len() >= max_hands {
                    break;
                }
                let roi = roi_from_palm(&palm);
                if !rois.iter().any(|tracked| rois_overlap(tracked, &roi)) {
                    rois.push(roi);
                }
            }
        }

        let presence_threshold = self.config.confidence(Threshold::Presence);
        let tracking_threshold = self.config.confidence(Threshold::Tracking);
        let mut estimates = Vec::with_capacity(rois.len());
        for roi in rois {
            let estimate = self.handpose.estimate(frame, roi)?;
            if estimate.hand.presence >= presence_threshold {
                estimates.push(estimate);
            }
        }
        estimates.sort_by(|a, b| {
            b.hand
                .presence
                .partial_cmp(&a.hand.presence)
                .unwrap_or(Ordering::Equal)
        });
        estimates.truncate(max_hands);

        self.tracked = estimates
            .iter()
            .filter(|e| e.hand.presence >= tracking_threshold)
            .filter_map(|e| roi_from_landmarks(&e.pixels))
            .collect();

        Ok(LandmarkSet {
            hands: estimates.into_iter().map(|e| e.hand).collect(),
        })
    }
}
