//! # Configuration
//!
//! YAML configuration for applications built on the engine:
//!
//! - Cache policy and directory
//! - Logging
//! - CSM estimator defaults
//! - Iterative solver defaults
//! - Propagation medium
//!
//! ## Configuration Search Path
//!
//! The first file found wins:
//! 1. Path in the `SONOMAP_CONFIG` environment variable
//! 2. `./sonomap.yaml`
//! 3. `config.yaml` in the user config directory (e.g. `~/.config/sonomap/`)
//! 4. `/etc/sonomap/config.yaml`
//!
//! ## Example Configuration
//!
//! ```yaml
//! cache:
//!   policy: always
//!   dir: /var/cache/sonomap
//!
//! spectra:
//!   block_size: 256
//!   overlap: 0.5
//!   window: Hanning
//!
//! solver:
//!   n_iter: 200
//!   damp: 0.6
//!
//! environment:
//!   speed_of_sound: 340.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CacheConfig};
use crate::geometry::{Environment, DEFAULT_SPEED_OF_SOUND};
use crate::observe::LogConfig;
use crate::spectra::PowerSpectra;
use crate::types::BeamResult;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "SONOMAP_CONFIG";

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {0}")]
    NotFound(String),

    #[error("failed to read config: {0}")]
    ReadError(String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Overrides for the iterative beamformers.
///
/// Unset fields keep each algorithm's own default; see `with_solver` on
/// the DAMAS, CLEAN, CMF and CLEAN-T beamformers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Iteration limit (`max_iter` for CMF)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_iter: Option<usize>,
    /// Loop gain of the CLEAN variants and DAMAS relaxation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damp: Option<f64>,
    /// CLEAN stop factor relative to the initial peak
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    /// Convergence tolerance of DAMAS, DAMAS+ and CMF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol: Option<f64>,
    /// Wall-clock budget per solve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

impl SolverConfig {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(damp) = self.damp {
            if !(damp > 0.0 && damp <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "solver.damp must be in (0, 1], got {}",
                    damp
                )));
            }
        }
        if let Some(stop) = self.stop {
            if !(stop.is_finite() && stop >= 0.0) {
                return Err(ConfigError::ValidationError("solver.stop must be non-negative".to_string()));
            }
        }
        if let Some(tol) = self.tol {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(ConfigError::ValidationError("solver.tol must be non-negative".to_string()));
            }
        }
        Ok(())
    }
}

/// Propagation medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// m/s
    pub speed_of_sound: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonomapConfig {
    pub version: String,
    pub cache: CacheConfig,
    pub logging: LogConfig,
    pub spectra: PowerSpectra,
    pub solver: SolverConfig,
    pub environment: EnvironmentConfig,
}

impl Default for SonomapConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            cache: CacheConfig::default(),
            logging: LogConfig::default(),
            spectra: PowerSpectra::default(),
            solver: SolverConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl SonomapConfig {
    /// Load from the search path; defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::NotFound(format!(
                    "{} points to {}",
                    CONFIG_ENV,
                    path.display()
                )));
            }
            return Self::load_from(&path);
        }
        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        tracing::debug!("no configuration file found; using defaults");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
    }

    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./sonomap.yaml")];
        if let Some(dirs) = directories::ProjectDirs::from("", "", "sonomap") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/sonomap/config.yaml"));
        paths
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.spectra
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("spectra: {}", e)))?;
        self.solver.validate()?;
        if !(self.environment.speed_of_sound.is_finite() && self.environment.speed_of_sound > 0.0) {
            return Err(ConfigError::ValidationError(
                "environment.speed_of_sound must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Cache handle for the `cache` section.
    pub fn open_cache(&self) -> BeamResult<Cache> {
        Cache::new(&self.cache)
    }

    pub fn environment(&self) -> BeamResult<Environment> {
        Environment::new(self.environment.speed_of_sound)
    }

    pub fn example_yaml() -> String {
        let config = Self {
            cache: CacheConfig {
                dir: CacheConfig::default_dir(),
                ..Default::default()
            },
            spectra: PowerSpectra {
                block_size: 256,
                overlap: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        serde_yaml::to_string(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::window::Window;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = SonomapConfig::default();
        assert_eq!(config.cache.policy, CachePolicy::Always);
        assert_eq!(config.solver, SolverConfig::default());
        assert_eq!(config.environment.speed_of_sound, 343.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
cache:
  policy: read_only
spectra:
  block_size: 512
  overlap: 0.5
  window: Hanning
solver:
  n_iter: 250
  max_duration_ms: 1500
environment:
  speed_of_sound: 340.0
logging:
  level: debug
  format: json
"#;
        let config = SonomapConfig::parse(yaml).unwrap();
        assert_eq!(config.cache.policy, CachePolicy::ReadOnly);
        assert_eq!(config.spectra.block_size, 512);
        assert_eq!(config.spectra.window, Window::Hanning);
        assert_eq!(config.solver.n_iter, Some(250));
        assert_eq!(config.solver.damp, None);
        assert_eq!(config.solver.max_duration(), Some(Duration::from_millis(1500)));
        assert_eq!(config.environment().unwrap().speed_of_sound(), 340.0);
        assert_eq!(config.logging.format, crate::observe::LogFormat::Json);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config = SonomapConfig::parse("solver:\n  damp: 0.3\n").unwrap();
        assert_eq!(config.solver.damp, Some(0.3));
        assert_eq!(config.solver.n_iter, None);
        assert_eq!(config.spectra.block_size, 128);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            SonomapConfig::parse("solver:\n  damp: 1.5\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            SonomapConfig::parse("solver:\n  tol: -1.0\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            SonomapConfig::parse("spectra:\n  block_size: 1\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            SonomapConfig::parse("environment:\n  speed_of_sound: 0\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            SonomapConfig::parse("solver: [1, 2]"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sonomap.yaml");
        let mut config = SonomapConfig::default();
        config.cache.dir = Some(dir.path().join("cache"));
        config.solver.stop = Some(1e-4);
        config.save(&path).unwrap();
        let loaded = SonomapConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.open_cache().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SonomapConfig::load_from(&dir.path().join("absent.yaml")),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_example_yaml() {
        let yaml = SonomapConfig::example_yaml();
        assert!(yaml.contains("cache:"));
        assert!(yaml.contains("spectra:"));
        assert!(!yaml.contains("n_iter"));
        assert!(SonomapConfig::parse(&yaml).is_ok());
    }

    #[test]
    fn test_config_search_paths() {
        let paths = SonomapConfig::config_search_paths();
        assert!(paths[0].ends_with("sonomap.yaml"));
        assert!(paths.last().unwrap().ends_with("config.yaml"));
    }
}
