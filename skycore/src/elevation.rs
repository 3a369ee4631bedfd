//! Bounded ground-elevation cache and the lookup throttle in front of the
//! external elevation service.

use indexmap::IndexMap;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: usize = 100;
/// Largest capacity accepted from configuration.
pub const MAX_CAPACITY: usize = 100_000;
/// Entries allocated up front; larger caches grow on demand.
const PREALLOCATED: usize = 1024;
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(1);
const MICRODEGREES: f64 = 1e6;

/// Coordinates rounded to 1e-6°, stored as integer micro-degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElevationKey {
    lat_e6: i64,
    lon_e6: i64,
}

impl ElevationKey {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat_e6: (lat * MICRODEGREES).round() as i64,
            lon_e6: (lon * MICRODEGREES).round() as i64,
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat_e6 as f64 / MICRODEGREES
    }

    pub fn lon(&self) -> f64 {
        self.lon_e6 as f64 / MICRODEGREES
    }

    /// Whether both coordinates are within `epsilon` degrees of `other`.
    pub fn is_near(&self, other: &ElevationKey, epsilon: f64) -> bool {
        (self.lat() - other.lat()).abs() <= epsilon && (self.lon() - other.lon()).abs() <= epsilon
    }
}

/// Insertion-ordered elevation map; the oldest insertion is evicted first.
#[derive(Debug, Clone)]
pub struct ElevationCache {
    entries: IndexMap<ElevationKey, f64>,
    capacity: usize,
}

impl Default for ElevationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ElevationCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.saturating_add(1).min(PREALLOCATED)),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &ElevationKey) -> Option<f64> {
        self.entries.get(key).copied()
    }

    /// Inserts a fetched value. A re-fetched key moves to the newest position.
    /// Returns the evicted keys.
    pub fn insert(&mut self, key: ElevationKey, elevation: f64) -> Vec<ElevationKey> {
        self.entries.shift_remove(&key);
        self.entries.insert(key, elevation);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.entries.shift_remove_index(0) {
                Some((old, _)) => evicted.push(old),
                None => break,
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &ElevationKey) -> bool {
        self.entries.contains_key(key)
    }
}

/// What the caller should do with a lookup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Fire the lookup now.
    Fire(ElevationKey),
    /// The window is closed; the key is parked as the trailing call due at the
    /// given instant.
    Deferred { due: Instant },
    /// The key is already being fetched or is already parked.
    Duplicate,
}

/// Leading + trailing throttle: the first request in a window fires at once,
/// the latest request made during the window fires when it closes.
#[derive(Debug, Clone)]
pub struct LookupThrottle {
    window: Duration,
    last_fired: Option<Instant>,
    trailing: Option<ElevationKey>,
    in_flight: Option<ElevationKey>,
}

impl Default for LookupThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_WINDOW)
    }
}

impl LookupThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
            trailing: None,
            in_flight: None,
        }
    }

    pub fn request(&mut self, key: ElevationKey, now: Instant) -> ThrottleDecision {
        if self.in_flight == Some(key) || self.trailing == Some(key) {
            return ThrottleDecision::Duplicate;
        }
        match self.last_fired {
            Some(at) if now.duration_since(at) < self.window => {
                self.trailing = Some(key);
                ThrottleDecision::Deferred {
                    due: at + self.window,
                }
            }
            _ => {
                self.trailing = None;
                self.fire(key, now)
            }
        }
    }

    /// Releases the trailing request once its window has closed.
    pub fn poll_trailing(&mut self, now: Instant) -> Option<ElevationKey> {
        let at = self.last_fired?;
        if now.duration_since(at) < self.window {
            return None;
        }
        let key = self.trailing.take()?;
        match self.fire(key, now) {
            ThrottleDecision::Fire(key) => Some(key),
            _ => None,
        }
    }

    /// When the parked trailing request becomes due, if any.
    pub fn trailing_due(&self) -> Option<Instant> {
        self.trailing?;
        self.last_fired.map(|at| at + self.window)
    }

    pub fn complete(&mut self, key: ElevationKey) {
        if self.in_flight == Some(key) {
            self.in_flight = None;
        }
    }

    fn fire(&mut self, key: ElevationKey, now: Instant) -> ThrottleDecision {
        self.last_fired = Some(now);
        self.in_flight = Some(key);
        ThrottleDecision::Fire(key)
    }
}

/// Response body of the elevation service.
#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    pub results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
pub struct LookupResult {
    pub elevation: f64,
}

impl LookupResponse {
    pub fn first_elevation(&self) -> Option<f64> {
        self.results
            .first()
            .map(|r| r.elevation)
            .filter(|e| e.is_finite())
    }
}

/// Builds `<host>/lookup?locations=<lat>,<lon>`.
pub fn lookup_url(host: &str, key: &ElevationKey) -> String {
    format!(
        "{}/lookup?locations={},{}",
        host.trim_end_matches('/'),
        key.lat(),
        key.lon()
    )
}
