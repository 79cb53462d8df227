//! Scenario configuration

use serde::{Deserialize, Serialize};
use sonomap_core::types::BeamError;

/// Errors raised while setting up a scenario
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("invalid scenario: {0}")]
    InvalidConfig(String),
}

impl From<SimError> for BeamError {
    fn from(e: SimError) -> Self {
        BeamError::Configuration(e.to_string())
    }
}

/// Configuration for the scenario engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Scenario duration in seconds
    pub duration_s: f64,
    /// Output sample rate in Hz
    pub sample_rate: f64,
    /// Largest block handed out per read
    pub block_size: usize,
    /// Standard deviation of the sensor noise in Pa
    pub noise_std: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            duration_s: 0.1,
            sample_rate: 51_200.0,
            block_size: 4096,
            noise_std: 0.0,
            seed: 42,
        }
    }
}

impl ScenarioConfig {
    /// Total number of samples per channel
    pub fn total_samples(&self) -> usize {
        (self.duration_s * self.sample_rate).ceil() as usize
    }

    /// Number of full or partial blocks
    pub fn num_blocks(&self) -> usize {
        let total = self.total_samples();
        (total + self.block_size - 1) / self.block_size
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.duration_s.is_finite() && self.duration_s >= 0.0) {
            return Err(SimError::InvalidConfig("duration must be non-negative".to_string()));
        }
        if self.block_size == 0 {
            return Err(SimError::InvalidConfig("block size must be positive".to_string()));
        }
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(SimError::InvalidConfig("noise std must be non-negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ScenarioConfig::default();
        assert_eq!(cfg.total_samples(), 5120);
        assert_eq!(cfg.num_blocks(), 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let bad_rate = ScenarioConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());
        let bad_block = ScenarioConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(bad_block.validate().is_err());
        let bad_noise = ScenarioConfig {
            noise_std: -1.0,
            ..Default::default()
        };
        let err: BeamError = bad_noise.validate().unwrap_err().into();
        assert!(matches!(err, BeamError::Configuration(_)));
    }
}
