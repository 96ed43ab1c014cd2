//! Optional geofence gating enforcement.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::BreakConfig;

/// Mean Earth radius (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Great-circle distance in meters (haversine).
    pub fn distance_meters(&self, other: &Coordinates) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

/// A position report from the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub coordinates: Coordinates,
    pub at: DateTime<Utc>,
}

/// Source of the device's last known position.
#[trait_variant::make(Send)]
pub trait LocationProvider: Send + Sync {
    /// Whether the host granted location access.
    fn permission_granted(&self) -> bool;

    /// Most recent fix, if any.
    async fn last_fix(&self) -> Option<LocationFix>;
}

/// Provider for hosts without location support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn permission_granted(&self) -> bool {
        false
    }

    async fn last_fix(&self) -> Option<LocationFix> {
        None
    }
}

/// What the gate answers when no usable fix exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Enforce anyway.
    #[default]
    Permit,
    /// Hold enforcement until a fix puts the device inside the fence.
    Deny,
}

#[derive(Debug, Clone, Copy)]
pub struct GateOptions {
    /// Upper bound on waiting for the provider within one tick.
    pub fix_timeout: Duration,
    /// Fixes older than this count as unavailable.
    pub max_fix_age: Duration,
    pub when_unavailable: UnavailablePolicy,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            fix_timeout: Duration::from_secs(2),
            max_fix_age: Duration::from_secs(15 * 60),
            when_unavailable: UnavailablePolicy::Permit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Gating off or no target configured.
    Disabled,
    /// No permission, no fix, stale fix, or the provider timed out.
    Unavailable,
    Inside { distance_meters: f64 },
    Outside { distance_meters: f64 },
}

/// Geofence predicate.
pub struct LocationGate<P> {
    provider: P,
    options: GateOptions,
    clock: Arc<dyn Clock>,
}

impl<P: LocationProvider> LocationGate<P> {
    pub fn new(provider: P, options: GateOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            options,
            clock,
        }
    }

    pub fn options(&self) -> &GateOptions {
        &self.options
    }

    pub async fn evaluate(&self, config: &BreakConfig) -> GateDecision {
        let Some(target) = config.location_target() else {
            return GateDecision::Disabled;
        };
        if !self.provider.permission_granted() {
            tracing::debug!("location permission not granted");
            return GateDecision::Unavailable;
        }

        let fix = match tokio::time::timeout(self.options.fix_timeout, self.provider.last_fix()).await {
            Ok(Some(fix)) => fix,
            Ok(None) => return GateDecision::Unavailable,
            Err(_) => {
                tracing::warn!(timeout = ?self.options.fix_timeout, "location fix timed out");
                return GateDecision::Unavailable;
            }
        };

        // fixes stamped in the future count as fresh
        let age = (self.clock.now().with_timezone(&Utc) - fix.at)
            .to_std()
            .unwrap_or_default();
        if age > self.options.max_fix_age {
            tracing::debug!(age_secs = age.as_secs(), "location fix is stale");
            return GateDecision::Unavailable;
        }

        let distance_meters = fix.coordinates.distance_meters(&target);
        if distance_meters <= f64::from(config.location_radius_meters) {
            GateDecision::Inside { distance_meters }
        } else {
            GateDecision::Outside { distance_meters }
        }
    }

    /// Whether enforcement may proceed under `config`.
    pub async fn permits(&self, config: &BreakConfig) -> bool {
        self.decision_permits(self.evaluate(config).await)
    }

    pub fn decision_permits(&self, decision: GateDecision) -> bool {
        match decision {
            GateDecision::Disabled | GateDecision::Inside { .. } => true,
            GateDecision::Outside { .. } => false,
            GateDecision::Unavailable => self.options.when_unavailable == UnavailablePolicy::Permit,
        }
    }
}
