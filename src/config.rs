use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::HmpError;

/// Hysteresis and significance policy for one model's possibility stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Idle -> Active when possibility reaches this value
    pub opening_threshold: f32,

    /// Active -> Idle when possibility drops below this value; must not exceed
    /// `opening_threshold`
    pub closing_threshold: f32,

    /// Closed intervals spanning fewer samples are kept but not reported
    pub min_duration_samples: u64,

    /// Closed intervals whose peak never exceeded this are kept but not reported
    pub min_peak_possibility: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            opening_threshold: 0.5,
            closing_threshold: 0.3,
            min_duration_samples: 0,
            min_peak_possibility: 0.0,
        }
    }
}

impl TrackerConfig {
    pub fn with_thresholds(opening_threshold: f32, closing_threshold: f32) -> Self {
        Self {
            opening_threshold,
            closing_threshold,
            ..Self::default()
        }
    }

    pub fn validate(&self, model: &str) -> std::result::Result<(), HmpError> {
        let finite = self.opening_threshold.is_finite()
            && self.closing_threshold.is_finite()
            && self.min_peak_possibility.is_finite();
        if !finite {
            return Err(HmpError::Configuration(format!(
                "model {model}: thresholds must be finite"
            )));
        }
        if self.closing_threshold > self.opening_threshold {
            return Err(HmpError::Configuration(format!(
                "model {model}: closing threshold {} exceeds opening threshold {}",
                self.closing_threshold, self.opening_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(flatten)]
    pub policy: TrackerConfig,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, policy: TrackerConfig) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }
}

/// The ordered model set, as loaded from a JSON file:
///
/// ```json
/// { "models": [ { "name": "Walk", "opening_threshold": 0.6 }, { "name": "Sit" } ] }
/// ```
///
/// Order must match the classifier's possibility vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSetConfig {
    pub models: Vec<ModelConfig>,
}

impl ModelSetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model set from {}", path.display()))?;
        let config: ModelSetConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse model set {}", path.display()))?;
        Ok(config)
    }

    /// Model set with the default policy for every name.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: names
                .into_iter()
                .map(|name| ModelConfig::new(name, TrackerConfig::default()))
                .collect(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|model| model.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_policy_has_hysteresis() {
        let policy = TrackerConfig::default();
        assert!(policy.closing_threshold < policy.opening_threshold);
        assert!(policy.validate("Walk").is_ok());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let policy = TrackerConfig::with_thresholds(0.3, 0.5);
        let err = policy.validate("Walk").unwrap_err();
        assert!(matches!(err, HmpError::Configuration(_)));
    }

    #[test]
    fn nan_threshold_rejected() {
        let policy = TrackerConfig::with_thresholds(f32::NAN, 0.2);
        assert!(policy.validate("Walk").is_err());
    }

    #[test]
    fn loads_partial_policies_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"models": [{{"name": "Climb", "opening_threshold": 0.7, "min_duration_samples": 3}}, {{"name": "Sit"}}]}}"#
        )
        .unwrap();

        let config = ModelSetConfig::load(file.path()).unwrap();
        assert_eq!(config.names(), vec!["Climb".to_string(), "Sit".to_string()]);
        assert_eq!(config.models[0].policy.opening_threshold, 0.7);
        assert_eq!(config.models[0].policy.closing_threshold, 0.3);
        assert_eq!(config.models[0].policy.min_duration_samples, 3);
        assert_eq!(config.models[1].policy, TrackerConfig::default());
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = Path::new("/nonexistent/models.json");
        assert!(ModelSetConfig::load(path).is_err());
    }
}
