//! Engine tuning knobs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use funnel_types::{FunnelError, Result};

/// Upper bound for a persistence call before an optimistic move is rolled back.
pub const MAX_MOVE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long `update_lead_stage` may take before the move is treated as failed.
    pub move_timeout_ms: u64,
    /// Quiet period a board waits after the last relevant event before reloading.
    pub refresh_debounce_ms: u64,
    /// Capacity of the event bus broadcast tap.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            move_timeout_ms: MAX_MOVE_TIMEOUT_MS,
            refresh_debounce_ms: 250,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.move_timeout_ms == 0 || self.move_timeout_ms > MAX_MOVE_TIMEOUT_MS {
            return Err(FunnelError::ValidationError(format!(
                "move_timeout_ms must be between 1 and {MAX_MOVE_TIMEOUT_MS}, got {}",
                self.move_timeout_ms
            )));
        }
        if self.refresh_debounce_ms == 0 || self.refresh_debounce_ms > 5_000 {
            return Err(FunnelError::ValidationError(format!(
                "refresh_debounce_ms must be between 1 and 5000, got {}",
                self.refresh_debounce_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(FunnelError::ValidationError(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.move_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.refresh_debounce(), Duration::from_millis(250));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"refresh_debounce_ms": 100}"#).unwrap();

        let cfg = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.refresh_debounce_ms, 100);
        assert_eq!(cfg.move_timeout_ms, MAX_MOVE_TIMEOUT_MS);
        assert_eq!(cfg.event_capacity, 256);
    }

    #[test]
    fn rejects_unbounded_timeout() {
        let cfg = EngineConfig {
            move_timeout_ms: 60_000,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(FunnelError::ValidationError(_))
        ));
    }

    #[test]
    fn rejects_zero_debounce_and_capacity() {
        let zero_debounce = EngineConfig {
            refresh_debounce_ms: 0,
            ..EngineConfig::default()
        };
        assert!(zero_debounce.validate().is_err());

        let zero_capacity = EngineConfig {
            event_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(zero_capacity.validate().is_err());
    }

    #[test]
    fn invalid_file_surfaces_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(FunnelError::Json(_))
        ));
    }
}
