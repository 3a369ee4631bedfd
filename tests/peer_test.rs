#![cfg(target_os = "linux")]

use skycore::peer::{IceServer, PeerConnector};
use skycore::signaling::SessionDescription;
use skylink::peer::WebRtcConnector;
use std::time::Duration;
use webrtc::api::APIBuilder;
use webrtc::api::media_engine::MediaEngine;
use webrtc::peer_connection::configuration::RTCConfiguration;

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

async fn vehicle_offer() -> (webrtc::peer_connection::RTCPeerConnection, String) {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();
    pc.create_data_channel("control", None).await.unwrap();
    let offer = pc.create_offer(None).await.unwrap();
    (pc, offer.sdp)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_superseded_negotiations_release_sockets() {
    let (vehicle, sdp) = vehicle_offer().await;
    let connector = WebRtcConnector::default();
    // Unroutable STUN server: gathering never completes on its own.
    let servers = vec![IceServer::stun("stun:10.255.255.1:3478")];
    let baseline = open_fds();

    for _ in 0..5 {
        let connector = connector.clone();
        let servers = servers.clone();
        let offer = SessionDescription::offer(sdp.clone());
        let task = tokio::spawn(async move { connector.accept(&offer, &servers).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.abort();
        let _ = task.await;
    }

    let mut now = open_fds();
    // In-flight STUN requests hold their socket until they time out.
    for _ in 0..100 {
        if now <= baseline + 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        now = open_fds();
    }
    assert!(now <= baseline + 1, "descriptors before={baseline} after={now}");
    vehicle.close().await.unwrap();
}
