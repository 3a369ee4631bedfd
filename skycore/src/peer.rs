//! Peer-session seam.
//!
//! The console never initiates a peer session: the vehicle sends an offer and
//! the console answers. A [`PeerConnector`] turns an offer into a live
//! [`PeerLink`] plus a stream of [`PeerEvent`]s. Candidate trickling is not
//! used, so the returned answer already carries every local candidate.

use crate::signaling::{IceCandidate, SessionDescription};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A STUN or TURN server handed to the peer session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Media kind of an inbound track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Identity of an inbound media track as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    /// Media section id the track was negotiated under, when known.
    pub mid: Option<String>,
    pub stream_id: Option<String>,
}

impl TrackInfo {
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
            mid: None,
            stream_id: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>) -> Self {
        self.mid = Some(mid.into());
        self
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }
}

/// Named sink a video track is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoRole {
    Primary,
    Secondary,
}

impl VideoRole {
    pub const ALL: [VideoRole; 2] = [VideoRole::Primary, VideoRole::Secondary];

    pub fn as_str(self) -> &'static str {
        match self {
            VideoRole::Primary => "primary",
            VideoRole::Secondary => "secondary",
        }
    }

    pub fn index(self) -> usize {
        match self {
            VideoRole::Primary => 0,
            VideoRole::Secondary => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// An event produced by a live peer session.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A remote media track arrived.
    Track(TrackInfo),
    /// Media data was received on a track. Transports rate-limit this.
    MediaActivity { track_id: String },
    /// The command data channel is open.
    DataChannelOpen,
    /// A text message arrived on the data channel.
    Message(String),
    /// The data channel closed.
    DataChannelClosed,
    /// The session failed at the transport level.
    Failed(String),
    /// The session was closed by the remote side.
    Closed,
}

/// A negotiated peer session.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Sends one text message on the data channel.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Adds a remote candidate received out of band.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Routes a track's media to the sink for `role`.
    fn bind_track(&self, track_id: &str, role: VideoRole);

    /// Stops routing a previously bound track and releases it.
    fn release_track(&self, track_id: &str);

    /// Tears the session down, detaching every handler.
    async fn close(&self);
}

/// The answer produced for an offer, together with the live session.
pub struct Negotiated {
    pub link: Arc<dyn PeerLink>,
    pub answer: SessionDescription,
    pub events: mpsc::Receiver<PeerEvent>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("answer", &self.answer)
            .finish_non_exhaustive()
    }
}

/// Creates non-initiating peer sessions from remote offers.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Accepts `offer`, gathers every local candidate and returns the answer.
    async fn accept(&self, offer: &SessionDescription, ice_servers: &[IceServer])
    -> Result<Negotiated>;
}
