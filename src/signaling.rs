//! Connection to the signaling relay.
//!
//! Keeps one relay connection alive, reconnecting with exponential backoff,
//! announces readiness on every (re)join and converts between relay envelopes
//! and [`SignalMessage`]s. Reconnecting here never touches the peer session.

use log::{debug, info, warn};
use skycore::net::{Transport, TransportEvent, TransportFactory};
use skycore::signaling::SignalMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Handle to the relay connection task.
pub struct SignalingClient {
    outbound: mpsc::Sender<SignalMessage>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

enum ConnectionEnd {
    Lost,
    Shutdown,
}

impl SignalingClient {
    /// Starts the connection loop. Inbound messages that parse are delivered on
    /// the returned receiver; malformed ones are logged and dropped.
    pub fn spawn(factory: Arc<dyn TransportFactory>) -> (Self, mpsc::Receiver<SignalMessage>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(connection_loop(
            factory,
            outbound_rx,
            inbound_tx,
            shutdown.clone(),
        ));

        (
            Self {
                outbound: outbound_tx,
                shutdown,
                task,
            },
            inbound_rx,
        )
    }

    /// Sender for messages to the relay.
    pub fn sender(&self) -> mpsc::Sender<SignalMessage> {
        self.outbound.clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            warn!(target: "Signaling", "Signaling task ended abnormally: {e}");
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

async fn connection_loop(
    factory: Arc<dyn TransportFactory>,
    mut outbound: mpsc::Receiver<SignalMessage>,
    inbound: mpsc::Sender<SignalMessage>,
    shutdown: Arc<Notify>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let attempt = tokio::select! {
            result = factory.create_transport() => result,
            _ = shutdown.notified() => return,
        };
        match attempt {
            Ok((transport, events)) => {
                backoff = INITIAL_BACKOFF;
                match run_connection(transport, events, &mut outbound, &inbound, &shutdown).await {
                    ConnectionEnd::Shutdown => return,
                    ConnectionEnd::Lost => {
                        warn!(target: "Signaling", "Relay connection lost");
                    }
                }
            }
            Err(e) => {
                warn!(target: "Signaling", "Failed to reach relay: {e:#}");
            }
        }

        info!(target: "Signaling", "Reconnecting in {backoff:?}");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.notified() => return,
        }
        backoff = next_backoff(backoff);
    }
}

async fn run_connection(
    transport: Arc<dyn Transport>,
    mut events: mpsc::Receiver<TransportEvent>,
    outbound: &mut mpsc::Receiver<SignalMessage>,
    inbound: &mpsc::Sender<SignalMessage>,
    shutdown: &Notify,
) -> ConnectionEnd {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Connected) => {
                    info!(target: "Signaling", "Joined relay, announcing readiness");
                    if let Err(e) = transport.send_text(&SignalMessage::AdminReady.to_json()).await {
                        warn!(target: "Signaling", "Failed to send admin-ready: {e:#}");
                        return ConnectionEnd::Lost;
                    }
                }
                Some(TransportEvent::TextReceived(text)) => match SignalMessage::from_json(&text) {
                    Ok(message) => {
                        debug!(target: "Signaling", "<-- {}", message.event_name());
                        if inbound.send(message).await.is_err() {
                            transport.disconnect().await;
                            return ConnectionEnd::Shutdown;
                        }
                    }
                    Err(e) => warn!(target: "Signaling", "Dropping relay message: {e}"),
                },
                Some(TransportEvent::Disconnected) | None => return ConnectionEnd::Lost,
            },
            message = outbound.recv() => {
                let Some(message) = message else {
                    transport.disconnect().await;
                    return ConnectionEnd::Shutdown;
                };
                debug!(target: "Signaling", "--> {}", message.event_name());
                if let Err(e) = transport.send_text(&message.to_json()).await {
                    warn!(target: "Signaling", "Failed to send {}: {e:#}", message.event_name());
                    return ConnectionEnd::Lost;
                }
            }
            _ = shutdown.notified() => {
                transport.disconnect().await;
                return ConnectionEnd::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skycore::signaling::{IceCandidate, SessionDescription};
    use std::sync::Mutex;

    /// Relay double: records sent frames and hands out scripted connections.
    #[derive(Default)]
    struct FakeRelay {
        sent: Arc<Mutex<Vec<String>>>,
        connects: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
        refuse_first: Mutex<u32>,
    }

    struct FakeTransport {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_text(&self, text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    #[async_trait]
    impl TransportFactory for FakeRelay {
        async fn create_transport(
            &self,
        ) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
            {
                let mut refuse = self.refuse_first.lock().unwrap();
                if *refuse > 0 {
                    *refuse -= 1;
                    anyhow::bail!("connection refused");
                }
            }
            let (tx, rx) = mpsc::channel(16);
            tx.try_send(TransportEvent::Connected).unwrap();
            self.connects.lock().unwrap().push(tx);
            Ok((
                Arc::new(FakeTransport {
                    sent: self.sent.clone(),
                }),
                rx,
            ))
        }
    }

    fn offer_json() -> String {
        SignalMessage::Offer(SessionDescription::offer("v=0\r\n")).to_json()
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_ready_on_join_and_inbound_parsing() {
        let relay = Arc::new(FakeRelay::default());
        let (client, mut inbound) = SignalingClient::spawn(relay.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            relay.sent.lock().unwrap().as_slice(),
            [r#"{"event":"admin-ready"}"#]
        );

        let events = relay.connects.lock().unwrap()[0].clone();
        events
            .send(TransportEvent::TextReceived("not json".into()))
            .await
            .unwrap();
        events
            .send(TransportEvent::TextReceived(
                r#"{"event":"offer","data":{"type":"answer","sdp":"v=0"}}"#.into(),
            ))
            .await
            .unwrap();
        events
            .send(TransportEvent::TextReceived(offer_json()))
            .await
            .unwrap();

        let message = inbound.recv().await.unwrap();
        assert!(matches!(message, SignalMessage::Offer(_)));

        client
            .sender()
            .send(SignalMessage::IceCandidate(IceCandidate {
                candidate: "candidate:1 1 udp 1 10.0.0.2 5000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(relay.sent.lock().unwrap()[1].contains("ice-candidate"));

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_backoff_and_rejoins() {
        let relay = Arc::new(FakeRelay {
            refuse_first: Mutex::new(2),
            ..Default::default()
        });
        let (client, _inbound) = SignalingClient::spawn(relay.clone());

        // Refused at 0 s and 1 s, connected after the 2 s backoff.
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(relay.connects.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(relay.connects.lock().unwrap().len(), 1);

        let first = relay.connects.lock().unwrap()[0].clone();
        first.send(TransportEvent::Disconnected).await.unwrap();
        tokio::time::sleep(INITIAL_BACKOFF + Duration::from_millis(10)).await;

        assert_eq!(relay.connects.lock().unwrap().len(), 2);
        let announcements = relay
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains("admin-ready"))
            .count();
        assert_eq!(announcements, 2);

        client.shutdown().await;
    }

    #[test]
    fn test_backoff_caps_at_thirty_seconds() {
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, [1, 2, 4, 8, 16, 30, 30]);
    }
}
