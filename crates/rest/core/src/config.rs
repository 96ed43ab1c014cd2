//! Break configuration snapshots.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::Coordinates;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("usage threshold must be greater than 0 seconds")]
    ZeroThreshold,
    #[error("block duration must be greater than 0 seconds")]
    ZeroDuration,
    #[error("location radius must be a positive number of meters, got {0}")]
    InvalidRadius(f32),
    #[error("target coordinates out of range: lat {lat}, lng {lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
}

/// How screen time is accumulated toward the threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Only uninterrupted screen-on time counts; any screen-off restarts the count.
    #[default]
    Continuous,
    /// All screen-on segments of the calendar day are summed.
    CumulativeDaily,
}

/// Immutable configuration snapshot. Replaced wholesale on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakConfig {
    pub usage_threshold_seconds: u32,
    pub block_duration_seconds: u32,
    pub tracking_mode: TrackingMode,
    pub location_enabled: bool,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_radius_meters: f32,
}

impl Default for BreakConfig {
    fn default() -> Self {
        Self {
            usage_threshold_seconds: 300,
            block_duration_seconds: 30,
            tracking_mode: TrackingMode::Continuous,
            location_enabled: false,
            location_lat: None,
            location_lng: None,
            location_radius_meters: 100.0,
        }
    }
}

impl BreakConfig {
    /// Reject snapshots the engine cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.usage_threshold_seconds == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.block_duration_seconds == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.location_enabled {
            // NaN fails this comparison too
            if !(self.location_radius_meters > 0.0) {
                return Err(ConfigError::InvalidRadius(self.location_radius_meters));
            }
            if let (Some(lat), Some(lng)) = (self.location_lat, self.location_lng) {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    return Err(ConfigError::InvalidCoordinates { lat, lng });
                }
            }
        }
        Ok(())
    }

    pub fn threshold_ms(&self) -> u64 {
        u64::from(self.usage_threshold_seconds) * 1000
    }

    /// Geofence target, or `None` when gating is off or coordinates are missing.
    pub fn location_target(&self) -> Option<Coordinates> {
        if !self.location_enabled {
            return None;
        }
        match (self.location_lat, self.location_lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BreakConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold_ms(), 300_000);
        assert_eq!(config.tracking_mode, TrackingMode::Continuous);
    }

    #[test]
    fn test_rejects_zero_durations() {
        let config = BreakConfig {
            usage_threshold_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreshold));

        let config = BreakConfig {
            block_duration_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration));
    }

    #[test]
    fn test_radius_only_checked_when_gating() {
        let mut config = BreakConfig {
            location_radius_meters: -5.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.location_enabled = true;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRadius(-5.0)));
    }

    #[test]
    fn test_missing_coordinates_disable_gate() {
        let config = BreakConfig {
            location_enabled: true,
            location_lat: Some(52.52),
            location_lng: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.location_target().is_none());
    }
}
