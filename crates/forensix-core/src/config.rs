//! Runtime configuration with built-in defaults.
//!
//! Every section is optional in the JSON file; missing fields fall back to
//! the values below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::carving::CarveMode;
use crate::error::{ForensicsError, Result};
use crate::integrity::HashAlgorithm;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensixConfig {
    pub carving: CarvingConfig,
    pub timestamps: TimestampConfig,
    pub hashing: HashingConfig,
    pub walk: WalkConfig,
}

/// Signature carving parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarvingConfig {
    /// Bytes read from the image per scan step
    pub chunk_size: usize,
    /// Bytes of the previous chunk kept so headers spanning a boundary are seen
    pub tail_size: usize,
    /// Candidates smaller than this are discarded
    pub min_file_size: u64,
    pub mode: CarveMode,
    /// Algorithm used for the `content_hash` of carved files
    pub content_hash: HashAlgorithm,
}

impl Default for CarvingConfig {
    fn default() -> Self {
        Self {
            chunk_size: MIB,
            tail_size: 1024,
            min_file_size: 512,
            mode: CarveMode::Basic,
            content_hash: HashAlgorithm::Md5,
        }
    }
}

/// Weights and thresholds of the timestamp anomaly scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    pub identical_weight: f64,
    pub order_weight: f64,
    pub precision_weight: f64,
    pub future_weight: f64,
    /// Grace period before a timestamp counts as "in the future"
    pub future_tolerance_secs: i64,
    /// A modified-time group must be strictly larger than this to be reported
    pub mass_pattern_threshold: usize,
    pub mass_pattern_samples: usize,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            identical_weight: 0.4,
            order_weight: 0.3,
            precision_weight: 0.2,
            future_weight: 0.5,
            future_tolerance_secs: 24 * 60 * 60,
            mass_pattern_threshold: 3,
            mass_pattern_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    pub default_algorithms: Vec<HashAlgorithm>,
    pub buffer_size: usize,
    /// Hash store location; `None` uses `~/.forensix/hashes.db`
    pub database_path: Option<PathBuf>,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            default_algorithms: vec![HashAlgorithm::Md5, HashAlgorithm::Sha256],
            buffer_size: 64 * 1024,
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub max_depth: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

impl ForensixConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ForensixConfig = serde_json::from_str(&raw)
            .map_err(|e| ForensicsError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// `~/.forensix/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".forensix").join("config.json"))
    }

    /// Load the file at [`ForensixConfig::default_path`] if it exists
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.carving.chunk_size == 0 {
            return Err(ForensicsError::Config("carving.chunk_size must be > 0".into()));
        }
        if self.hashing.buffer_size == 0 {
            return Err(ForensicsError::Config("hashing.buffer_size must be > 0".into()));
        }
        if self.walk.max_depth == 0 {
            return Err(ForensicsError::Config("walk.max_depth must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ForensixConfig::default();
        assert_eq!(config.carving.chunk_size, 1024 * 1024);
        assert_eq!(config.carving.tail_size, 1024);
        assert_eq!(config.carving.min_file_size, 512);
        assert_eq!(config.timestamps.identical_weight, 0.4);
        assert_eq!(config.timestamps.mass_pattern_threshold, 3);
        assert_eq!(config.walk.max_depth, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"carving": {{"mode": "smart", "chunk_size": 4096}}}}"#).unwrap();

        let config = ForensixConfig::load(file.path()).unwrap();
        assert_eq!(config.carving.mode, CarveMode::Smart);
        assert_eq!(config.carving.chunk_size, 4096);
        assert_eq!(config.carving.tail_size, 1024);
        assert_eq!(
            config.hashing.default_algorithms,
            vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"walk": {{"max_depth": 0}}}}"#).unwrap();
        assert!(matches!(
            ForensixConfig::load(file.path()),
            Err(ForensicsError::Config(_))
        ));
    }
}
