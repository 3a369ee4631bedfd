//! Vehicle position as reported by telemetry, augmented with ground elevation.

use crate::elevation::ElevationKey;
use serde::Serialize;

/// Positions closer than this (degrees, roughly one metre) reuse the last
/// ground elevation.
pub const CARRY_FORWARD_EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryPosition {
    pub lat: f64,
    pub lon: f64,
    pub relative_altitude: f64,
    pub msl_altitude: f64,
    pub ground_elevation: Option<f64>,
    pub height_above_ground: Option<f64>,
}

impl TelemetryPosition {
    pub fn key(&self) -> ElevationKey {
        ElevationKey::new(self.lat, self.lon)
    }
}

/// Rebuilds [`TelemetryPosition`] for each location report.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    current: Option<TelemetryPosition>,
    /// Point and value of the last resolved ground elevation.
    last_ground: Option<(ElevationKey, f64)>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<TelemetryPosition> {
        self.current
    }

    /// Applies a location report. `cached` is the cache hit for this point, if
    /// any. Without one, the last known ground elevation is reused so height
    /// above ground stays available while the lookup is outstanding or failed.
    pub fn update(
        &mut self,
        lat: f64,
        lon: f64,
        relative_altitude: f64,
        msl_altitude: f64,
        cached: Option<f64>,
    ) -> TelemetryPosition {
        let key = ElevationKey::new(lat, lon);
        if let Some(elevation) = cached {
            self.last_ground = Some((key, elevation));
        }
        let ground = cached.or_else(|| self.last_ground.map(|(_, e)| e));
        let position = TelemetryPosition {
            lat,
            lon,
            relative_altitude,
            msl_altitude,
            ground_elevation: ground,
            height_above_ground: ground.map(|g| msl_altitude - g),
        };
        self.current = Some(position);
        position
    }

    /// Whether a fresh lookup is needed for the given point.
    pub fn needs_lookup(&self, key: &ElevationKey) -> bool {
        match self.last_ground {
            Some((last, _)) => !last.is_near(key, CARRY_FORWARD_EPSILON),
            None => true,
        }
    }

    /// Applies a resolved lookup. Returns the refreshed position when the
    /// result belongs to the current point.
    pub fn resolve(&mut self, key: ElevationKey, elevation: f64) -> Option<TelemetryPosition> {
        let current = self.current?;
        if !current.key().is_near(&key, CARRY_FORWARD_EPSILON) {
            return None;
        }
        self.last_ground = Some((key, elevation));
        let refreshed = TelemetryPosition {
            ground_elevation: Some(elevation),
            height_above_ground: Some(current.msl_altitude - elevation),
            ..current
        };
        self.current = Some(refreshed);
        Some(refreshed)
    }
}
