#![allow(dead_code)]

use async_trait::async_trait;
use skycore::joystick::GamepadSnapshot;
use skycore::net::{HttpClient, HttpRequest, HttpResponse, Transport, TransportEvent, TransportFactory};
use skycore::peer::{IceServer, Negotiated, PeerConnector, PeerEvent, PeerLink, TrackInfo, VideoRole};
use skycore::signaling::{IceCandidate, SessionDescription, SignalMessage};
use skycore::state::ConnectionState;
use skylink::config::ConsoleConfig;
use skylink::{Console, ConsoleDeps, ConsoleHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const TWO_CAMERA_OFFER: &str = "v=0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=mid:0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=mid:1\r\n\
    m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
    a=mid:2\r\n";

/// Signaling relay double. Frames the console sends are recorded; frames
/// pushed with [`MockRelay::deliver`] arrive as if another member sent them.
#[derive(Default)]
pub struct MockRelay {
    pub sent: Arc<Mutex<Vec<String>>>,
    connections: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
}

struct MockRelayTransport {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for MockRelayTransport {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn disconnect(&self) {}
}

#[async_trait]
impl TransportFactory for MockRelay {
    async fn create_transport(
        &self,
    ) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        let (tx, rx) = mpsc::channel(64);
        tx.try_send(TransportEvent::Connected).unwrap();
        self.connections.lock().unwrap().push(tx);
        Ok((
            Arc::new(MockRelayTransport {
                sent: self.sent.clone(),
            }),
            rx,
        ))
    }
}

impl MockRelay {
    pub async fn deliver(&self, message: SignalMessage) {
        self.deliver_raw(message.to_json()).await;
    }

    pub async fn deliver_raw(&self, text: String) {
        let tx = self.connections.lock().unwrap().last().cloned().unwrap();
        tx.send(TransportEvent::TextReceived(text)).await.unwrap();
    }

    pub fn sent_events(&self) -> Vec<SignalMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| SignalMessage::from_json(s).ok())
            .collect()
    }
}

/// Peer link double recording everything the session does to it.
#[derive(Default)]
pub struct MockLink {
    pub sent: Mutex<Vec<String>>,
    pub routes: Mutex<HashMap<String, VideoRole>>,
    pub released: Mutex<Vec<String>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
}

impl MockLink {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_matching(&self, prefix: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    pub fn route(&self, track_id: &str) -> Option<VideoRole> {
        self.routes.lock().unwrap().get(track_id).copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("link closed");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn bind_track(&self, track_id: &str, role: VideoRole) {
        self.routes.lock().unwrap().insert(track_id.to_string(), role);
    }

    fn release_track(&self, track_id: &str) {
        self.routes.lock().unwrap().remove(track_id);
        self.released.lock().unwrap().push(track_id.to_string());
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One accepted offer.
#[derive(Clone)]
pub struct MockPeer {
    pub link: Arc<MockLink>,
    pub events: mpsc::Sender<PeerEvent>,
    pub offer: SessionDescription,
    pub ice_servers: Vec<IceServer>,
}

impl MockPeer {
    pub async fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event).await;
    }

    pub async fn message(&self, text: &str) {
        self.emit(PeerEvent::Message(text.to_string())).await;
    }

    pub async fn video_track(&self, id: &str, mid: Option<&str>) {
        let mut track = TrackInfo::video(id);
        if let Some(mid) = mid {
            track = track.with_mid(mid);
        }
        self.emit(PeerEvent::Track(track)).await;
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub peers: Mutex<Vec<MockPeer>>,
    pub fail: AtomicBool,
}

impl MockConnector {
    pub fn accepted(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn peer(&self, index: usize) -> MockPeer {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> MockPeer {
        self.peers.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn accept(
        &self,
        offer: &SessionDescription,
        ice_servers: &[IceServer],
    ) -> anyhow::Result<Negotiated> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("no route to vehicle");
        }
        let link = Arc::new(MockLink::default());
        let (events, rx) = mpsc::channel(64);
        self.peers.lock().unwrap().push(MockPeer {
            link: link.clone(),
            events,
            offer: offer.clone(),
            ice_servers: ice_servers.to_vec(),
        });
        Ok(Negotiated {
            link,
            answer: SessionDescription::answer("v=0\r\na=candidate:1 1 udp 1 10.0.0.1 9 typ host\r\n"),
            events: rx,
        })
    }
}

/// Elevation service double answering every lookup with the same value.
pub struct MockElevationApi {
    pub elevation: f64,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl MockElevationApi {
    pub fn new(elevation: f64) -> Self {
        Self {
            elevation,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl HttpClient for MockElevationApi {
    async fn execute(&self, _request: HttpRequest) -> anyhow::Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Ok(HttpResponse {
                status_code: 500,
                body: Vec::new(),
            });
        }
        Ok(HttpResponse {
            status_code: 200,
            body: format!(r#"{{"results":[{{"elevation":{}}}]}}"#, self.elevation).into_bytes(),
        })
    }
}

pub struct Harness {
    pub console: ConsoleHandle,
    pub relay: Arc<MockRelay>,
    pub connector: Arc<MockConnector>,
    pub elevation: Arc<MockElevationApi>,
    pub gamepad: watch::Sender<GamepadSnapshot>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_config(ConsoleConfig::default()).await
    }

    pub async fn with_config(config: ConsoleConfig) -> Self {
        let relay = Arc::new(MockRelay::default());
        let connector = Arc::new(MockConnector::default());
        let elevation = Arc::new(MockElevationApi::new(430.0));
        let (gamepad, gamepad_rx) = watch::channel(GamepadSnapshot::default());
        let console = Console::start(
            &config,
            ConsoleDeps {
                transport_factory: relay.clone(),
                peer_connector: connector.clone(),
                http_client: elevation.clone(),
                gamepad: gamepad_rx,
            },
        );
        settle().await;
        Self {
            console,
            relay,
            connector,
            elevation,
            gamepad,
        }
    }

    /// Delivers an offer through the relay and waits for the session to
    /// negotiate it.
    pub async fn offer(&self) -> MockPeer {
        let before = self.connector.accepted();
        self.relay
            .deliver(SignalMessage::Offer(SessionDescription::offer(TWO_CAMERA_OFFER)))
            .await;
        settle().await;
        assert_eq!(self.connector.accepted(), before + 1, "offer was not accepted");
        self.connector.last()
    }

    /// Offer plus data channel open.
    pub async fn connect(&self) -> MockPeer {
        let peer = self.offer().await;
        peer.emit(PeerEvent::DataChannelOpen).await;
        settle().await;
        assert_eq!(self.console.state(), ConnectionState::Connected);
        peer
    }
}

/// Lets every task run until idle. Time is paused in these tests, so this
/// only advances the clock by a millisecond.
pub async fn settle() {
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
