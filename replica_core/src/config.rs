//! Host configuration.

use crate::error::ReplicaError;
use serde::{Deserialize, Serialize};

/// Configuration for a replica host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Logical tick rate in Hz (default: 20)
    pub tick_rate_hz: u32,
    
    /// Visibility range for objects whose kind does not set one (default: 64.0)
    pub default_view_range: f64,
    
    /// Point passed to the observer directory each tick
    pub interest_center: [f64; 3],
    
    /// Radius passed to the observer directory (`None` = every observer)
    pub interest_radius: Option<f64>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            default_view_range: 64.0,
            interest_center: [0.0, 0.0, 0.0],
            interest_radius: None,
        }
    }
}

impl ReplicaConfig {
    /// Parses a JSON config, filling missing fields with defaults, and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ReplicaError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReplicaError::configuration(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }
    
    /// Rejects configurations the tick loop cannot run with.
    pub fn validate(&self) -> Result<(), ReplicaError> {
        if self.tick_rate_hz == 0 {
            return Err(ReplicaError::configuration("tick_rate_hz must be at least 1"));
        }
        if !valid_range(self.default_view_range) {
            return Err(ReplicaError::configuration(format!(
                "default_view_range must be finite and positive, got {}",
                self.default_view_range
            )));
        }
        if let Some(radius) = self.interest_radius {
            if !valid_range(radius) {
                return Err(ReplicaError::configuration(format!(
                    "interest_radius must be finite and positive, got {radius}"
                )));
            }
        }
        if self.interest_center.iter().any(|c| !c.is_finite()) {
            return Err(ReplicaError::configuration("interest_center must be finite"));
        }
        Ok(())
    }
    
    /// Duration of one tick in seconds.
    pub fn tick_secs(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }
}

pub(crate) fn valid_range(range: f64) -> bool {
    range.is_finite() && range > 0.0
}
