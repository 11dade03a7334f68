mod common;
mod engine;
mod handpose;
mod palm;

use std::{fmt::Display, path::Path, time::Instant};

use thiserror::Error;

pub use engine::OrtLandmarkerFactory;

use crate::{
    settings::DetectorConfig,
    types::{ErrorKind, Frame, LandmarkSet, ResultBundle},
};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("hand landmarker is not set up")]
    NotSetUp,
    #[error("GPU delegate unavailable: {0}")]
    GpuUnavailable(String),
    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: String, message: String },
    #[error("hand landmark detection failed: {0:#}")]
    Inference(#[from] anyhow::Error),
}

impl DetectorError {
    fn model_load(path: &Path, err: impl Display) -> Self {
        DetectorError::ModelLoad {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::GpuUnavailable(_) => ErrorKind::GpuUnavailable,
            _ => ErrorKind::Other,
        }
    }
}

/// A loaded model pair able to find hands in a frame.
pub trait HandLandmarker: Send {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<LandmarkSet>;
}

/// Creates landmarkers for a given configuration. Called on every setup so a
/// new delegate or threshold takes effect.
pub trait LandmarkerFactory: Send + 'static {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn HandLandmarker>, DetectorError>;
}

/// Owns the live landmarker and the configuration it was built with.
pub struct LandmarkerHelper {
    factory: Box<dyn LandmarkerFactory>,
    config: DetectorConfig,
    landmarker: Option<Box<dyn HandLandmarker>>,
}

impl LandmarkerHelper {
    pub fn new(factory: Box<dyn LandmarkerFactory>, config: DetectorConfig) -> Self {
        Self {
            factory,
            config,
            landmarker: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn setup(&mut self) -> Result<(), DetectorError> {
        self.landmarker = None;
        let landmarker = self.factory.create(&self.config)?;
        self.landmarker = Some(landmarker);
        Ok(())
    }

    pub fn clear(&mut self) {
        if self.landmarker.take().is_some() {
            log::debug!("hand landmarker released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.landmarker.is_none()
    }

    /// Tears the landmarker down and builds a new one with `config`.
    pub fn reconfigure(&mut self, config: DetectorConfig) -> Result<(), DetectorError> {
        self.clear();
        self.config = config;
        self.setup()
    }

    pub fn detect_live_stream(&mut self, frame: &Frame) -> Result<ResultBundle, DetectorError> {
        let landmarker = self.landmarker.as_mut().ok_or(DetectorError::NotSetUp)?;

        let started = Instant::now();
        let landmarks = landmarker.detect(frame)?;
        let inference_time = started.elapsed();

        Ok(ResultBundle {
            landmarks,
            inference_time,
            input_width: frame.width,
            input_height: frame.height,
            timestamp: frame.timestamp,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        settings::{Delegate, Threshold},
        types::tests::hand_from_fn,
    };

    /// Reports one hand per frame and counts how often it was built.
    pub(crate) struct FakeFactory {
        pub(crate) created: Arc<AtomicUsize>,
    }

    impl FakeFactory {
        pub(crate) fn new() -> Self {
            Self {
                created: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    pub(crate) struct FakeLandmarker;

    impl HandLandmarker for FakeLandmarker {
        fn detect(&mut self, frame: &Frame) -> anyhow::Result<LandmarkSet> {
            if frame.width == 0 {
                anyhow::bail!("empty frame");
            }
            Ok(LandmarkSet {
                hands: vec![hand_from_fn(|i| (i as f32 / 21.0, 0.5))],
            })
        }
    }

    impl LandmarkerFactory for FakeFactory {
        fn create(
            &self,
            config: &DetectorConfig,
        ) -> Result<Box<dyn HandLandmarker>, DetectorError> {
            if config.delegate == Delegate::Gpu {
                return Err(DetectorError::GpuUnavailable("no device".into()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeLandmarker))
        }
    }

    pub(crate) fn test_frame(width: u32, height: u32) -> Frame {
        Frame {
            rgba: vec![0; (width * height * 4) as usize],
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn detect_requires_setup() {
        let mut helper = LandmarkerHelper::new(Box::new(FakeFactory::new()), Default::default());
        assert!(helper.is_closed());
        let err = helper.detect_live_stream(&test_frame(4, 3)).unwrap_err();
        assert!(matches!(err, DetectorError::NotSetUp));
    }

    #[test]
    fn bundle_carries_input_size() {
        let mut helper = LandmarkerHelper::new(Box::new(FakeFactory::new()), Default::default());
        helper.setup().unwrap();
        let frame = test_frame(8, 6);
        let bundle = helper.detect_live_stream(&frame).unwrap();
        assert_eq!((bundle.input_width, bundle.input_height), (8, 6));
        assert_eq!(bundle.timestamp, frame.timestamp);
        assert_eq!(bundle.landmarks.hands.len(), 1);
    }

    #[test]
    fn inference_errors_are_reported() {
        let mut helper = LandmarkerHelper::new(Box::new(FakeFactory::new()), Default::default());
        helper.setup().unwrap();
        let err = helper.detect_live_stream(&test_frame(0, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("empty frame"));
    }

    #[test]
    fn reconfigure_rebuilds_landmarker() {
        let factory = FakeFactory::new();
        let created = factory.created.clone();
        let mut helper = LandmarkerHelper::new(Box::new(factory), Default::default());
        helper.setup().unwrap();

        let mut config = *helper.config();
        assert!(config.increase(Threshold::Presence));
        helper.reconfigure(config).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!((helper.config().confidence(Threshold::Presence) - 0.6).abs() < 1e-6);
        helper.clear();
        assert!(helper.is_closed());
    }

    #[test]
    fn gpu_failure_leaves_helper_closed() {
        let mut helper = LandmarkerHelper::new(Box::new(FakeFactory::new()), Default::default());
        helper.setup().unwrap();
        let mut config = DetectorConfig::default();
        config.delegate = Delegate::Gpu;
        let err = helper.reconfigure(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GpuUnavailable);
        assert!(helper.is_closed());
    }
}
