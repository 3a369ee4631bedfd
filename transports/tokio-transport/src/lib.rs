//! Tokio WebSocket transport for the signaling relay.
//!
//! Provides a [`TransportFactory`] that dials the relay with tokio-tungstenite
//! and exposes it as a pipe of text frames.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use skycore::net::{Transport, TransportEvent, TransportFactory};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// One live WebSocket connection to the relay.
pub struct TokioWebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        debug!(target: "Signaling", "--> Sending text frame: {} bytes", text.len());
        sink.send(Message::text(text))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take()
            && let Err(e) = sink.close().await
        {
            debug!(target: "Signaling", "Error closing websocket: {e}");
        }
    }
}

/// Dials the relay at a fixed URL.
pub struct TokioWebSocketTransportFactory {
    url: String,
}

impl TokioWebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!(target: "Signaling", "Dialing {}", self.url);
        let (client, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(TokioWebSocketTransport::new(sink));

        let _ = event_tx.send(TransportEvent::Connected).await;
        tokio::task::spawn(read_pump(stream, event_tx));

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!(target: "Signaling", "<-- Received text frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::TextReceived(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    warn!(target: "Signaling", "Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                trace!(target: "Signaling", "Received close frame");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(target: "Signaling", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Signaling", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_text_frames_round_trip_through_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // Echo one frame back and hang up.
            if let Some(Ok(msg)) = ws.next().await {
                ws.send(msg).await.unwrap();
            }
            ws.close(None).await.unwrap();
        });

        let factory = TokioWebSocketTransportFactory::new(format!("ws://{addr}"));
        let (transport, mut events) = factory.create_transport().await.unwrap();
        assert!(matches!(events.recv().await, Some(TransportEvent::Connected)));

        transport.send_text(r#"{"event":"admin-ready"}"#).await.unwrap();
        match events.recv().await {
            Some(TransportEvent::TextReceived(text)) => {
                assert_eq!(text, r#"{"event":"admin-ready"}"#)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Disconnected)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let factory = TokioWebSocketTransportFactory::new(format!("ws://{addr}"));
        let (transport, _events) = factory.create_transport().await.unwrap();
        transport.disconnect().await;
        assert!(transport.send_text("late").await.is_err());
    }
}
