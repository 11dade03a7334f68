use thiserror::Error;

pub const MIN_CONFIDENCE: f32 = 0.2;
pub const MAX_CONFIDENCE: f32 = 0.8;
pub const CONFIDENCE_STEP: f32 = 0.1;
pub const MIN_HANDS: usize = 1;
pub const MAX_HANDS: usize = 2;

// Values are stored rounded to this precision so that repeated stepping does
// not drift past a bound through float error.
const CONFIDENCE_PRECISION: f32 = 100.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl Delegate {
    pub fn label(&self) -> &'static str {
        match self {
            Delegate::Cpu => "CPU",
            Delegate::Gpu => "GPU",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Delegate::Cpu),
            "gpu" | "cuda" => Some(Delegate::Gpu),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Threshold {
    Detection,
    Tracking,
    Presence,
}

impl Threshold {
    pub const ALL: [Threshold; 3] = [
        Threshold::Detection,
        Threshold::Tracking,
        Threshold::Presence,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Threshold::Detection => "Detection threshold",
            Threshold::Tracking => "Tracking threshold",
            Threshold::Presence => "Presence threshold",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("{threshold:?} confidence {value:.2} is outside [0.2, 0.8]")]
    ConfidenceOutOfRange { threshold: Threshold, value: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorConfig {
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
    min_presence_confidence: f32,
    max_hands: usize,
    pub delegate: Delegate,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            min_presence_confidence: 0.5,
            max_hands: 1,
            delegate: Delegate::Cpu,
        }
    }
}

impl DetectorConfig {
    pub fn confidence(&self, threshold: Threshold) -> f32 {
        match threshold {
            Threshold::Detection => self.min_detection_confidence,
            Threshold::Tracking => self.min_tracking_confidence,
            Threshold::Presence => self.min_presence_confidence,
        }
    }

    pub fn set_confidence(&mut self, threshold: Threshold, value: f32) -> Result<(), SettingsError> {
        let value = round_confidence(value);
        if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&value) {
            return Err(SettingsError::ConfidenceOutOfRange { threshold, value });
        }
        *self.confidence_mut(threshold) = value;
        Ok(())
    }

    pub fn can_increase(&self, threshold: Threshold) -> bool {
        round_confidence(self.confidence(threshold) + CONFIDENCE_STEP) <= MAX_CONFIDENCE
    }

    pub fn can_decrease(&self, threshold: Threshold) -> bool {
        round_confidence(self.confidence(threshold) - CONFIDENCE_STEP) >= MIN_CONFIDENCE
    }

    /// Raises the threshold by one step. Returns `false` at the upper bound.
    pub fn increase(&mut self, threshold: Threshold) -> bool {
        let next = self.confidence(threshold) + CONFIDENCE_STEP;
        self.set_confidence(threshold, next).is_ok()
    }

    /// Lowers the threshold by one step. Returns `false` at the lower bound.
    pub fn decrease(&mut self, threshold: Threshold) -> bool {
        let next = self.confidence(threshold) - CONFIDENCE_STEP;
        self.set_confidence(threshold, next).is_ok()
    }

    pub fn max_hands(&self) -> usize {
        self.max_hands
    }

    pub fn set_max_hands(&mut self, hands: usize) {
        self.max_hands = hands.clamp(MIN_HANDS, MAX_HANDS);
    }

    pub fn can_add_hand(&self) -> bool {
        self.max_hands < MAX_HANDS
    }

    pub fn can_remove_hand(&self) -> bool {
        self.max_hands > MIN_HANDS
    }

    fn confidence_mut(&mut self, threshold: Threshold) -> &mut f32 {
        match threshold {
            Threshold::Detection => &mut self.min_detection_confidence,
            Threshold::Tracking => &mut self.min_tracking_confidence,
            Threshold::Presence => &mut self.min_presence_confidence,
        }
    }
}

fn round_confidence(value: f32) -> f32 {
    (value * CONFIDENCE_PRECISION).round() / CONFIDENCE_PRECISION
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_confidence_outside_bounds() {
        let mut config = DetectorConfig::default();
        for threshold in Threshold::ALL {
            assert!(config.set_confidence(threshold, 0.1).is_err());
            assert!(config.set_confidence(threshold, 0.9).is_err());
            assert_relative_eq!(config.confidence(threshold), 0.5);
        }
    }

    #[test]
    fn accepts_bounds_themselves() {
        let mut config = DetectorConfig::default();
        config.set_confidence(Threshold::Presence, 0.2).unwrap();
        assert_relative_eq!(config.confidence(Threshold::Presence), 0.2);
        config.set_confidence(Threshold::Presence, 0.8).unwrap();
        assert_relative_eq!(config.confidence(Threshold::Presence), 0.8);
    }

    #[test]
    fn stepping_stops_at_bounds() {
        let mut config = DetectorConfig::default();
        let mut steps = 0;
        while config.increase(Threshold::Detection) {
            steps += 1;
        }
        assert_eq!(steps, 3);
        assert_relative_eq!(config.confidence(Threshold::Detection), 0.8);
        assert!(!config.can_increase(Threshold::Detection));
        assert!(config.can_decrease(Threshold::Detection));

        let mut steps = 0;
        while config.decrease(Threshold::Detection) {
            steps += 1;
        }
        assert_eq!(steps, 6);
        assert_relative_eq!(config.confidence(Threshold::Detection), 0.2);
        assert!(!config.can_decrease(Threshold::Detection));
    }

    #[test]
    fn max_hands_is_clamped() {
        let mut config = DetectorConfig::default();
        config.set_max_hands(0);
        assert_eq!(config.max_hands(), 1);
        assert!(!config.can_remove_hand());
        config.set_max_hands(7);
        assert_eq!(config.max_hands(), 2);
        assert!(!config.can_add_hand());
    }

    #[test]
    fn delegate_parsing() {
        assert_eq!(Delegate::parse("GPU"), Some(Delegate::Gpu));
        assert_eq!(Delegate::parse(" cpu "), Some(Delegate::Cpu));
        assert_eq!(Delegate::parse("npu"), None);
    }
}
