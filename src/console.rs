//! The console: wires signaling, elevation and the session actor together and
//! hands out a cloneable handle.

use crate::config::ConsoleConfig;
use crate::elevation::ElevationService;
use crate::error::SessionError;
use crate::session::{ConsoleCommand, ControlMode, Session, SessionConfig, SessionInputs};
use crate::signaling::SignalingClient;
use crate::types::events::EventBus;
use log::{info, warn};
use skycore::joystick::GamepadSnapshot;
use skycore::mission::{LatLon, MissionParams, MissionRequest, SurveyArea};
use skycore::net::{HttpClient, TransportFactory};
use skycore::peer::PeerConnector;
use skycore::protocol::Command;
use skycore::signaling::SessionDescription;
use skycore::state::ConnectionState;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// External collaborators of the console.
pub struct ConsoleDeps {
    pub transport_factory: Arc<dyn TransportFactory>,
    pub peer_connector: Arc<dyn PeerConnector>,
    pub http_client: Arc<dyn HttpClient>,
    /// Latest input device state. A receiver whose sender never changes reads
    /// as centred sticks.
    pub gamepad: watch::Receiver<GamepadSnapshot>,
}

pub struct Console;

impl Console {
    /// Starts every background task. Must be called inside a tokio runtime.
    pub fn start(config: &ConsoleConfig, deps: ConsoleDeps) -> ConsoleHandle {
        let bus = Arc::new(EventBus::new());
        let (signaling, signals) = SignalingClient::spawn(deps.transport_factory);
        let (elevation, elevations, elevation_task) = ElevationService::spawn(
            deps.http_client,
            config.elevation_host.clone(),
            config.elevation_cache_capacity,
        );

        let session_config = SessionConfig {
            ice_servers: config.ice_servers.clone(),
            track_labels: config.track_labels.clone(),
            joystick: config.joystick.clone(),
            control_mode: config.control_mode,
        };
        let (session, state) = Session::new(
            session_config,
            deps.peer_connector,
            elevation,
            bus.clone(),
            signaling.sender(),
            deps.gamepad,
        );

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let session_task = tokio::spawn(session.run(SessionInputs {
            commands: commands_rx,
            signals,
            elevations,
        }));
        info!(target: "Console", "Console started, relay at {}", config.signaling_url);

        ConsoleHandle {
            commands: commands_tx,
            state,
            bus,
            tasks: Some(ConsoleTasks {
                signaling,
                session: session_task,
                elevation: elevation_task,
            }),
        }
    }
}

struct ConsoleTasks {
    signaling: SignalingClient,
    session: JoinHandle<()>,
    elevation: JoinHandle<()>,
}

/// Operator-facing entry point into a running console.
pub struct ConsoleHandle {
    commands: mpsc::Sender<ConsoleCommand>,
    state: watch::Receiver<ConnectionState>,
    bus: Arc<EventBus>,
    tasks: Option<ConsoleTasks>,
}

impl ConsoleHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel following every state change.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Sends a raw command. Returns the correlation id when the command opens
    /// a pending request.
    pub async fn send(&self, command: Command) -> Result<Option<String>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ConsoleCommand::Send { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Hands an offer to the session directly, bypassing the relay.
    pub async fn accept_offer(&self, offer: SessionDescription) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ConsoleCommand::Negotiate { offer, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn set_control_mode(&self, mode: ControlMode) -> Result<(), SessionError> {
        self.commands
            .send(ConsoleCommand::SetControlMode(mode))
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn capture_images(&self) -> Result<String, SessionError> {
        self.send_tracked(Command::CaptureImages).await
    }

    pub async fn start_recording(&self, fps: f32) -> Result<String, SessionError> {
        self.send_tracked(Command::VideoStart { fps }).await
    }

    pub async fn stop_recording(&self) -> Result<String, SessionError> {
        self.send_tracked(Command::VideoStop).await
    }

    /// Validates and sends a survey mission over a finalized area.
    pub async fn start_mission(
        &self,
        area: &SurveyArea,
        params: MissionParams,
    ) -> Result<(), SessionError> {
        let request = MissionRequest::new(area, params)?;
        self.send(Command::StartSurveillance(request)).await?;
        Ok(())
    }

    pub async fn goto(&self, lat: f64, lon: f64, altitude: f64) -> Result<(), SessionError> {
        if !LatLon::new(lat, lon).is_valid() || !altitude.is_finite() {
            return Err(SessionError::InvalidGoto { lat, lon, altitude });
        }
        self.send(Command::Goto { lat, lon, altitude }).await?;
        Ok(())
    }

    async fn send_tracked(&self, command: Command) -> Result<String, SessionError> {
        let id = self.send(command).await?;
        // Tracked commands always open a request.
        id.ok_or(SessionError::Closed)
    }

    /// Tears the session down, stops every task and leaves the state at
    /// `Closed`.
    pub async fn shutdown(mut self) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        let Some(tasks) = self.tasks.take() else {
            return;
        };
        tasks.signaling.shutdown().await;
        if let Err(e) = tasks.session.await {
            warn!(target: "Console", "Session task ended abnormally: {e}");
        }
        tasks.elevation.abort();
        info!(target: "Console", "Console stopped");
    }
}

impl Drop for ConsoleHandle {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            tasks.session.abort();
            tasks.elevation.abort();
        }
    }
}
