use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use skycore::joystick::GamepadSnapshot;
use skylink::config::Cli;
use skylink::peer::WebRtcConnector;
use skylink::{Console, ConsoleDeps, joystick};
use skylink_tokio_transport::TokioWebSocketTransportFactory;
use skylink_ureq_http_client::UreqHttpClient;
use std::sync::Arc;
use tokio::sync::watch;

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };
    if !config.has_relay() {
        warn!("No TURN relay configured; vehicles behind symmetric NAT will not connect");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let (gamepad_tx, gamepad_rx) = watch::channel(GamepadSnapshot::default());
        let reader = config
            .joystick_device
            .clone()
            .map(|device| joystick::spawn_reader(device, gamepad_tx));

        let deps = ConsoleDeps {
            transport_factory: Arc::new(TokioWebSocketTransportFactory::new(
                config.signaling_url.clone(),
            )),
            peer_connector: Arc::new(WebRtcConnector::new(config.video_sinks.clone())),
            http_client: Arc::new(UreqHttpClient::new()),
            gamepad: gamepad_rx,
        };
        let console = Console::start(&config, deps);
        info!("Waiting for the vehicle's offer. Press Ctrl-C to quit.");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
        }
        info!("Shutting down");
        console.shutdown().await;
        if let Some(reader) = reader {
            reader.abort();
        }
    });
}
