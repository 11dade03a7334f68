use std::{env, path::PathBuf};

use crate::settings::{Delegate, DetectorConfig};

const MODEL_DIR_ENV: &str = "HAND_LANDMARKER_MODEL_DIR";
const OUTPUT_DIR_ENV: &str = "HAND_LANDMARKER_OUTPUT_DIR";
const DELEGATE_ENV: &str = "HAND_LANDMARKER_DELEGATE";
const MAX_HANDS_ENV: &str = "HAND_LANDMARKER_MAX_HANDS";

const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_SAVE_FOLDER: &str = "HandLandmarker";
const CROPPED_FOLDER: &str = "Cropped";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub detector: DetectorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            output_dir: default_output_dir(),
            detector: DetectorConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(MODEL_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(OUTPUT_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(DELEGATE_ENV) {
            match Delegate::parse(&value) {
                Some(delegate) => config.detector.delegate = delegate,
                None => log::warn!("ignoring unknown {DELEGATE_ENV}={value:?}, using CPU"),
            }
        }
        if let Some(value) = lookup(MAX_HANDS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(hands) => config.detector.set_max_hands(hands),
                Err(err) => log::warn!("ignoring invalid {MAX_HANDS_ENV}={value:?}: {err}"),
            }
        }

        config
    }

    pub fn photo_dir(&self) -> PathBuf {
        self.output_dir.clone()
    }

    pub fn cropped_dir(&self) -> PathBuf {
        self.output_dir.join(CROPPED_FOLDER)
    }
}

fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.model_dir, PathBuf::from("models"));
        assert!(config.output_dir.ends_with("HandLandmarker"));
        assert_eq!(config.detector, DetectorConfig::default());
    }

    #[test]
    fn environment_overrides() {
        let config = config_from(&[
            (MODEL_DIR_ENV, "/opt/models"),
            (OUTPUT_DIR_ENV, "/tmp/shots"),
            (DELEGATE_ENV, "gpu"),
            (MAX_HANDS_ENV, "5"),
        ]);
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.cropped_dir(), PathBuf::from("/tmp/shots/Cropped"));
        assert_eq!(config.detector.delegate, Delegate::Gpu);
        assert_eq!(config.detector.max_hands(), 2);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config_from(&[(DELEGATE_ENV, "tpu"), (MAX_HANDS_ENV, "many")]);
        assert_eq!(config.detector.delegate, Delegate::Cpu);
        assert_eq!(config.detector.max_hands(), 1);
    }
}
