// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::BlockflowError;

/// Engine settings, usually loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum tasks in flight per execution
    pub max_in_flight: usize,

    /// Maximum tasks in flight across all executions
    pub global_max_in_flight: Option<usize>,

    /// How long a cancelled executor may take to wind down before it is aborted
    pub cancel_grace_ms: u64,

    /// Log lines shown per failed task in CLI reports
    pub log_tail_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            global_max_in_flight: None,
            cancel_grace_ms: 5_000,
            log_tail_lines: 20,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, BlockflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| BlockflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, BlockflowError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BlockflowError> {
        if self.max_in_flight == 0 {
            return Err(BlockflowError::InvalidConfig {
                reason: "max_in_flight must be at least 1".into(),
            });
        }
        if self.global_max_in_flight == Some(0) {
            return Err(BlockflowError::InvalidConfig {
                reason: "global_max_in_flight must be at least 1 when set".into(),
            });
        }
        Ok(())
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn with_global_max_in_flight(mut self, max: usize) -> Self {
        self.global_max_in_flight = Some(max);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = EngineConfig::from_toml("max_in_flight = 8\n").unwrap();

        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.global_max_in_flight, None);
        assert_eq!(config.log_tail_lines, 20);
        assert_eq!(config.cancel_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("max_in_flight = 0"),
            Err(BlockflowError::InvalidConfig { .. })
        ));
        assert!(EngineConfig::from_toml("global_max_in_flight = 0").is_err());
        assert!(matches!(
            EngineConfig::from_toml("max_in_flight = \"lots\""),
            Err(BlockflowError::Toml { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockflow.toml");
        std::fs::write(&path, "max_in_flight = 2\nglobal_max_in_flight = 6\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config, EngineConfig::default().with_max_in_flight(2).with_global_max_in_flight(6));
    }
}
