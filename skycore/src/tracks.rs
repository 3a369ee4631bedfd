//! Assignment of inbound video tracks to the primary and secondary sinks.
//!
//! A track is classified by, in order: a configured label matching its stream
//! id or track id, the position of its `mid` among the offer's video sections,
//! and finally arrival order.

use crate::peer::{TrackInfo, TrackKind, VideoRole};
use serde::Deserialize;

/// Out-of-band labels naming which track feeds which sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackLabels {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl TrackLabels {
    fn role_for(&self, track: &TrackInfo) -> Option<VideoRole> {
        let matches = |label: &Option<String>| {
            label.as_deref().is_some_and(|l| {
                track.id == l || track.stream_id.as_deref() == Some(l)
            })
        };
        if matches(&self.primary) {
            Some(VideoRole::Primary)
        } else if matches(&self.secondary) {
            Some(VideoRole::Secondary)
        } else {
            None
        }
    }
}

/// Result of classifying one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub role: VideoRole,
    pub track: TrackInfo,
    /// Track previously bound to the same role; the caller releases it.
    pub replaced: Option<TrackInfo>,
}

/// Per-session track classifier. Build a new one for every negotiation.
#[derive(Debug, Clone, Default)]
pub struct TrackClassifier {
    labels: TrackLabels,
    video_mids: Vec<String>,
    slots: [Option<TrackInfo>; 2],
}

impl TrackClassifier {
    pub fn new(labels: TrackLabels, video_mids: Vec<String>) -> Self {
        Self {
            labels,
            video_mids,
            slots: [None, None],
        }
    }

    /// Binds a track to a role. Returns `None` for non-video tracks and for a
    /// track that is already bound to the role it classifies into.
    pub fn classify(&mut self, track: TrackInfo) -> Option<Binding> {
        if track.kind != TrackKind::Video {
            return None;
        }
        let role = self
            .labels
            .role_for(&track)
            .or_else(|| self.role_by_mid(&track))
            .unwrap_or_else(|| self.role_by_arrival());

        let slot = &mut self.slots[role.index()];
        if slot.as_ref().is_some_and(|bound| bound.id == track.id) {
            return None;
        }
        let replaced = slot.replace(track.clone());
        Some(Binding {
            role,
            track,
            replaced,
        })
    }

    pub fn bound(&self, role: VideoRole) -> Option<&TrackInfo> {
        self.slots[role.index()].as_ref()
    }

    /// Role of a bound track, looked up by track id.
    pub fn role_of(&self, track_id: &str) -> Option<VideoRole> {
        VideoRole::ALL
            .into_iter()
            .find(|role| self.bound(*role).is_some_and(|t| t.id == track_id))
    }

    /// Unbinds every role, returning the tracks to release.
    pub fn reset(&mut self) -> Vec<TrackInfo> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    fn role_by_mid(&self, track: &TrackInfo) -> Option<VideoRole> {
        let mid = track.mid.as_deref()?;
        let ordinal = self.video_mids.iter().position(|m| m == mid)?;
        VideoRole::from_index(ordinal)
    }

    fn role_by_arrival(&self) -> VideoRole {
        if self.slots[VideoRole::Primary.index()].is_none() {
            VideoRole::Primary
        } else {
            VideoRole::Secondary
        }
    }
}
