use super::Session;
use crate::types::events::{EventBus, VideoHealth};
use log::{debug, info, warn};
use skycore::liveness::{LivenessChange, VIDEO_WATCHDOG_INTERVAL};
use skycore::peer::VideoRole;
use skycore::protocol::Command;
use skycore::state::ConnectionTransition;
use tokio::time::Instant;

impl Session {
    /// Sends one heartbeat on the data channel.
    pub(super) async fn send_heartbeat(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        let Some(link) = self.link.clone() else {
            return;
        };
        debug!(target: "Session/Keepalive", "Sending heartbeat");
        if let Err(e) = link.send_text(&Command::Heartbeat.encode()).await {
            warn!(target: "Session/Keepalive", "Heartbeat send failed: {e:#}");
        }
    }

    /// Any heartbeat or valid telemetry proves the vehicle is alive.
    pub(super) fn record_signal(&mut self) {
        let change = self.heartbeat.record_signal(Instant::now());
        self.apply_liveness(change);
    }

    pub(super) fn check_liveness(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        let now = Instant::now();
        let video_active = self.video.any_active(now);
        let change = self.heartbeat.check(now, video_active);
        self.apply_liveness(change);
    }

    fn apply_liveness(&mut self, change: Option<LivenessChange>) {
        let transition = match change {
            Some(LivenessChange::Stale) => {
                let silent = Instant::now().saturating_duration_since(self.heartbeat.last_signal_at());
                warn!(target: "Session/Keepalive", "No signal from vehicle for {silent:?}");
                ConnectionTransition::SignalStale
            }
            Some(LivenessChange::Restored) => {
                info!(target: "Session/Keepalive", "Vehicle signal restored");
                ConnectionTransition::SignalRestored
            }
            None => return,
        };
        if let Err(e) = self.transition(transition) {
            debug!(target: "Session/Keepalive", "{e}");
        }
    }

    /// Reports bound video slots that started or stopped delivering media.
    pub(super) fn check_video_health(&mut self) {
        let bound: Vec<VideoRole> = VideoRole::ALL
            .into_iter()
            .filter(|role| self.classifier.bound(*role).is_some())
            .collect();
        for (role, healthy) in self.video.watchdog(&bound, Instant::now(), VIDEO_WATCHDOG_INTERVAL) {
            if healthy {
                info!(target: "Session/Keepalive", "{} video is receiving", role.as_str());
            } else {
                warn!(target: "Session/Keepalive", "{} video stalled", role.as_str());
            }
            EventBus::publish(&self.bus.video_health, VideoHealth { role, healthy });
        }
    }
}
