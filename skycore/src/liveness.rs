//! Heartbeat failsafe and video activity bookkeeping.

use crate::peer::VideoRole;
use std::time::Duration;
use tokio::time::Instant;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(300);
pub const STALE_THRESHOLD: Duration = Duration::from_secs(5);
/// Media within this window counts as video actively flowing.
pub const VIDEO_ACTIVE_WINDOW: Duration = Duration::from_secs(1);
pub const VIDEO_WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of a liveness update that changes the degraded flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessChange {
    Stale,
    Restored,
}

#[derive(Debug, Clone)]
pub struct HeartbeatState {
    last_signal_at: Instant,
    threshold: Duration,
    stale: bool,
}

impl HeartbeatState {
    pub fn new(now: Instant) -> Self {
        Self::with_threshold(now, STALE_THRESHOLD)
    }

    pub fn with_threshold(now: Instant, threshold: Duration) -> Self {
        Self {
            last_signal_at: now,
            threshold,
            stale: false,
        }
    }

    pub fn last_signal_at(&self) -> Instant {
        self.last_signal_at
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Records a heartbeat or liveness-proving telemetry message.
    pub fn record_signal(&mut self, now: Instant) -> Option<LivenessChange> {
        self.last_signal_at = now;
        self.set_stale(false)
    }

    /// Periodic check. Active video satisfies liveness on its own.
    pub fn check(&mut self, now: Instant, video_active: bool) -> Option<LivenessChange> {
        if video_active {
            return self.set_stale(false);
        }
        let silent_for = now.saturating_duration_since(self.last_signal_at);
        self.set_stale(silent_for > self.threshold)
    }

    fn set_stale(&mut self, stale: bool) -> Option<LivenessChange> {
        if self.stale == stale {
            return None;
        }
        self.stale = stale;
        Some(if stale {
            LivenessChange::Stale
        } else {
            LivenessChange::Restored
        })
    }
}

/// Last media arrival per bound role.
#[derive(Debug, Clone, Default)]
pub struct VideoActivity {
    last_media: [Option<Instant>; 2],
    healthy: [Option<bool>; 2],
}

impl VideoActivity {
    pub fn record(&mut self, role: VideoRole, now: Instant) {
        self.last_media[role.index()] = Some(now);
    }

    pub fn forget(&mut self, role: VideoRole) {
        self.last_media[role.index()] = None;
        self.healthy[role.index()] = None;
    }

    pub fn received_within(&self, role: VideoRole, now: Instant, window: Duration) -> bool {
        self.last_media[role.index()]
            .is_some_and(|at| now.saturating_duration_since(at) <= window)
    }

    /// Any bound track delivered media within [`VIDEO_ACTIVE_WINDOW`].
    pub fn any_active(&self, now: Instant) -> bool {
        VideoRole::ALL
            .into_iter()
            .any(|role| self.received_within(role, now, VIDEO_ACTIVE_WINDOW))
    }

    /// Watchdog pass over the bound roles. Returns the roles whose health
    /// changed together with the new value.
    pub fn watchdog(
        &mut self,
        bound: &[VideoRole],
        now: Instant,
        window: Duration,
    ) -> Vec<(VideoRole, bool)> {
        let mut changes = Vec::new();
        for &role in bound {
            let healthy = self.received_within(role, now, window);
            let slot = &mut self.healthy[role.index()];
            if *slot != Some(healthy) {
                *slot = Some(healthy);
                changes.push((role, healthy));
            }
        }
        changes
    }
}
