//! Peer sessions on top of the `webrtc` crate.
//!
//! The vehicle initiates: it opens the data channel and sends two video
//! tracks. The console answers, forwards inbound RTP of bound tracks to the
//! configured UDP sinks and reports everything else as [`PeerEvent`]s.

use crate::config::VideoSinks;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use skycore::peer::{
    IceServer, Negotiated, PeerConnector, PeerEvent, PeerLink, TrackInfo, TrackKind, VideoRole,
};
use skycore::signaling::{IceCandidate, SessionDescription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

/// Upper bound on local candidate gathering before the answer is sent.
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum spacing of `MediaActivity` events per track.
const ACTIVITY_REPORT_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("candidate gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),

    #[error("no local description after answering")]
    NoLocalDescription,

    #[error("data channel is not open")]
    NotOpen,

    #[error("failed to bind video forwarding socket: {0}")]
    Socket(#[from] std::io::Error),
}

/// Creates answering peer sessions.
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    sinks: VideoSinks,
}

impl WebRtcConnector {
    pub fn new(sinks: VideoSinks) -> Self {
        Self { sinks }
    }

    fn build_api() -> Result<webrtc::api::API, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build())
    }

    async fn forwarding_socket(&self) -> Result<Option<Arc<UdpSocket>>, PeerError> {
        if self.sinks.primary.is_none() && self.sinks.secondary.is_none() {
            return Ok(None);
        }
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Some(Arc::new(socket)))
    }
}

fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// State shared between the link and the transport callbacks.
struct Shared {
    events: mpsc::Sender<PeerEvent>,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    /// Bound tracks and the sink role their media goes to.
    routes: DashMap<String, VideoRole>,
    sinks: VideoSinks,
    socket: Option<Arc<UdpSocket>>,
    /// Set on close; callbacks check it before reporting anything.
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn emit(&self, event: PeerEvent) {
        if self.is_closed() {
            return;
        }
        let _ = self.events.send(event).await;
    }

    async fn forward(&self, track_id: &str, packet: &[u8]) {
        let Some(socket) = &self.socket else {
            return;
        };
        let Some(role) = self.routes.get(track_id).map(|r| *r) else {
            return;
        };
        let Some(sink) = self.sinks.get(role) else {
            return;
        };
        if let Err(e) = socket.send_to(packet, sink).await {
            debug!(target: "Peer", "Forwarding {} RTP to {sink} failed: {e}", role.as_str());
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn accept(
        &self,
        offer: &SessionDescription,
        ice_servers: &[IceServer],
    ) -> anyhow::Result<Negotiated> {
        let api = Self::build_api()?;
        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);
        // Until the link owns it, any exit from here (errors, or the caller
        // dropping this future) must release the ICE agent.
        let guard = CloseOnDrop::new(pc.clone());

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            events: events_tx,
            data_channel: Mutex::new(None),
            routes: DashMap::new(),
            sinks: self.sinks.clone(),
            socket: self.forwarding_socket().await?,
            closed: AtomicBool::new(false),
        });

        install_handlers(&pc, &shared);

        pc.set_remote_description(RTCSessionDescription::offer(offer.sdp.clone())?)
            .await?;
        let answer = pc.create_answer(None).await?;
        let mut gathering = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;

        if tokio::time::timeout(GATHER_TIMEOUT, gathering.recv())
            .await
            .is_err()
        {
            return Err(PeerError::GatheringTimeout(GATHER_TIMEOUT).into());
        }

        let Some(local) = pc.local_description().await else {
            return Err(PeerError::NoLocalDescription.into());
        };
        info!(target: "Peer", "Answer created with gathered candidates");
        guard.disarm();

        Ok(Negotiated {
            link: Arc::new(WebRtcPeerLink { pc, shared }),
            answer: SessionDescription::answer(local.sdp),
            events: events_rx,
        })
    }
}

/// Closes a peer connection that was never handed to a [`WebRtcPeerLink`].
struct CloseOnDrop {
    pc: Option<Arc<RTCPeerConnection>>,
}

impl CloseOnDrop {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc: Some(pc) }
    }

    fn disarm(mut self) {
        self.pc = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(pc) = self.pc.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(target: "Peer", "No runtime to close abandoned peer connection");
            return;
        };
        debug!(target: "Peer", "Closing abandoned peer connection");
        handle.spawn(async move {
            if let Err(e) = pc.close().await {
                debug!(target: "Peer", "Error closing abandoned peer connection: {e}");
            }
        });
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, shared: &Arc<Shared>) {
    let s = shared.clone();
    pc.on_track(Box::new(move |track, _receiver, transceiver| {
        let s = s.clone();
        Box::pin(async move {
            on_remote_track(s, track, transceiver).await;
        })
    }));

    let s = shared.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let s = s.clone();
        Box::pin(async move {
            info!(target: "Peer", "Data channel '{}' announced", dc.label());
            attach_data_channel(&s, &dc);
            *s.data_channel.lock().await = Some(dc);
        })
    }));

    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        Box::pin(async move {
            debug!(target: "Peer", "ICE connection state: {state}");
        })
    }));

    let s = shared.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let s = s.clone();
        Box::pin(async move {
            debug!(target: "Peer", "Peer connection state: {state}");
            match state {
                RTCPeerConnectionState::Failed => {
                    s.emit(PeerEvent::Failed("peer connection failed".into())).await;
                }
                RTCPeerConnectionState::Closed => s.emit(PeerEvent::Closed).await,
                _ => {}
            }
        })
    }));
}

fn attach_data_channel(shared: &Arc<Shared>, dc: &Arc<RTCDataChannel>) {
    let s = shared.clone();
    dc.on_open(Box::new(move || {
        let s = s.clone();
        Box::pin(async move {
            info!(target: "Peer", "Data channel open");
            s.emit(PeerEvent::DataChannelOpen).await;
        })
    }));

    let s = shared.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let s = s.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => s.emit(PeerEvent::Message(text)).await,
                Err(_) => warn!(target: "Peer", "Dropping non-UTF-8 data channel message"),
            }
        })
    }));

    let s = shared.clone();
    dc.on_close(Box::new(move || {
        let s = s.clone();
        Box::pin(async move {
            info!(target: "Peer", "Data channel closed");
            s.emit(PeerEvent::DataChannelClosed).await;
        })
    }));
}

async fn on_remote_track(
    shared: Arc<Shared>,
    track: Arc<TrackRemote>,
    transceiver: Arc<RTCRtpTransceiver>,
) {
    let kind = match track.kind() {
        RTPCodecType::Video => TrackKind::Video,
        _ => TrackKind::Audio,
    };
    let info = TrackInfo {
        id: track.id(),
        kind,
        mid: transceiver.mid().map(|m| m.to_string()),
        stream_id: Some(track.stream_id()).filter(|s| !s.is_empty()),
    };
    info!(target: "Peer", "Remote {kind:?} track {} (mid {:?})", info.id, info.mid);
    let track_id = info.id.clone();
    shared.emit(PeerEvent::Track(info)).await;

    if kind != TrackKind::Video {
        return;
    }

    // Drain RTP until the track ends; reading is what keeps media flowing.
    let mut last_report: Option<Instant> = None;
    loop {
        let (packet, _) = match track.read_rtp().await {
            Ok(read) => read,
            Err(e) => {
                debug!(target: "Peer", "Track {track_id} ended: {e}");
                break;
            }
        };
        if shared.is_closed() {
            break;
        }

        let now = Instant::now();
        if last_report.is_none_or(|at| now.duration_since(at) >= ACTIVITY_REPORT_INTERVAL) {
            last_report = Some(now);
            let _ = shared.events.try_send(PeerEvent::MediaActivity {
                track_id: track_id.clone(),
            });
        }

        if let Ok(raw) = packet.marshal() {
            shared.forward(&track_id, &raw).await;
        }
    }
}

/// A live answering session.
pub struct WebRtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    shared: Arc<Shared>,
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        let dc = self.shared.data_channel.lock().await.clone();
        let dc = dc.ok_or(PeerError::NotOpen)?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(PeerError::NotOpen.into());
        }
        dc.send_text(text.to_string()).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    fn bind_track(&self, track_id: &str, role: VideoRole) {
        self.shared.routes.insert(track_id.to_string(), role);
    }

    fn release_track(&self, track_id: &str) {
        self.shared.routes.remove(track_id);
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.routes.clear();
        if let Some(dc) = self.shared.data_channel.lock().await.take() {
            let _ = dc.close().await;
        }
        if let Err(e) = self.pc.close().await {
            debug!(target: "Peer", "Error closing peer connection: {e}");
        }
        info!(target: "Peer", "Peer session closed");
    }
}
