//! The session actor.
//!
//! One task owns every piece of session state: the connection state machine,
//! the live peer link, track bindings, liveness, pending requests, position
//! and the manual-control sampler. Signaling, peer events, timers, elevation
//! results and console commands all arrive as messages, so handlers never run
//! concurrently. Work that suspends (negotiation, relay I/O, elevation
//! lookups) runs in separate tasks and reports back.

mod keepalive;
mod tasks;

pub(crate) use tasks::Timer;

use crate::elevation::{ElevationService, ElevationUpdate};
use crate::error::SessionError;
use crate::types::events::{
    CaptureEvent, EventBus, GotoEvent, MissionEvent, RecordingEvent, StateChanged,
    ThermalStatus, VideoSlotEvent,
};
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use skycore::elevation::ElevationKey;
use skycore::joystick::{GamepadSnapshot, JoystickSampler, JoystickSettings};
use skycore::liveness::{
    HEARTBEAT_INTERVAL, HeartbeatState, LIVENESS_CHECK_INTERVAL, VIDEO_WATCHDOG_INTERVAL,
    VideoActivity,
};
use skycore::peer::{IceServer, Negotiated, PeerConnector, PeerEvent, PeerLink, TrackInfo, VideoRole};
use skycore::position::PositionTracker;
use skycore::protocol::{Command, DecodeError, HEARTBEAT_TOKEN, Telemetry};
use skycore::requests::{PendingRequests, RequestKind};
use skycore::signaling::{SdpType, SessionDescription, SignalMessage, SignalingError};
use skycore::state::{ConnectionState, ConnectionTransition, InvalidTransition, apply_transition};
use skycore::tracks::{TrackClassifier, TrackLabels};
use std::sync::Arc;
use std::time::Duration;
use tasks::{SessionTasks, TaskSlot, spawn_deadline, spawn_ticker};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub const JOYSTICK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// Who is flying: the operator's input device or the vehicle's autopilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    #[default]
    Manual,
    Auto,
}

/// Requests from the console handle.
pub(crate) enum ConsoleCommand {
    Send {
        command: Command,
        reply: oneshot::Sender<Result<Option<String>, SessionError>>,
    },
    Negotiate {
        offer: SessionDescription,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SetControlMode(ControlMode),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results of work running outside the actor.
pub(crate) enum Input {
    Negotiated {
        generation: u64,
        result: Result<Negotiated>,
    },
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    Tick {
        generation: u64,
        timer: Timer,
    },
}

/// Static inputs of the session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServer>,
    pub track_labels: TrackLabels,
    pub joystick: JoystickSettings,
    pub control_mode: ControlMode,
}

/// Inbound message streams consumed by [`Session::run`].
pub(crate) struct SessionInputs {
    pub commands: mpsc::Receiver<ConsoleCommand>,
    pub signals: mpsc::Receiver<SignalMessage>,
    pub elevations: mpsc::Receiver<ElevationUpdate>,
}

pub(crate) struct Session {
    config: SessionConfig,
    connector: Arc<dyn PeerConnector>,
    elevation: ElevationService,
    bus: Arc<EventBus>,
    signal_out: mpsc::Sender<SignalMessage>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    inputs_tx: mpsc::Sender<Input>,
    inputs_rx: mpsc::Receiver<Input>,

    /// Bumped on every teardown; inputs tagged with an older value are stale.
    generation: u64,
    link: Option<Arc<dyn PeerLink>>,
    tasks: SessionTasks,
    classifier: TrackClassifier,
    heartbeat: HeartbeatState,
    video: VideoActivity,
    requests: PendingRequests,
    position: PositionTracker,
    sampler: JoystickSampler,
    gamepad: watch::Receiver<GamepadSnapshot>,
    mode: ControlMode,
}

fn validate_offer(offer: &SessionDescription) -> Result<(), SignalingError> {
    if offer.sdp_type != SdpType::Offer {
        return Err(SignalingError::WrongType {
            expected: SdpType::Offer.as_str(),
            got: offer.sdp_type.as_str().to_string(),
        });
    }
    if offer.sdp.trim().is_empty() {
        return Err(SignalingError::MissingPayload(skycore::signaling::EVENT_OFFER));
    }
    Ok(())
}

impl Session {
    pub(crate) fn new(
        config: SessionConfig,
        connector: Arc<dyn PeerConnector>,
        elevation: ElevationService,
        bus: Arc<EventBus>,
        signal_out: mpsc::Sender<SignalMessage>,
        gamepad: watch::Receiver<GamepadSnapshot>,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let session = Self {
            classifier: TrackClassifier::new(config.track_labels.clone(), Vec::new()),
            sampler: JoystickSampler::new(config.joystick.clone()),
            mode: config.control_mode,
            config,
            connector,
            elevation,
            bus,
            signal_out,
            state: ConnectionState::Idle,
            state_tx,
            inputs_tx,
            inputs_rx,
            generation: 0,
            link: None,
            tasks: SessionTasks::default(),
            heartbeat: HeartbeatState::new(Instant::now()),
            video: VideoActivity::default(),
            requests: PendingRequests::default(),
            position: PositionTracker::new(),
            gamepad,
        };
        (session, state_rx)
    }

    pub(crate) async fn run(mut self, mut inputs: SessionInputs) {
        info!(target: "Session", "Session started");
        loop {
            tokio::select! {
                biased;
                command = inputs.commands.recv() => match command {
                    Some(ConsoleCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(input) = self.inputs_rx.recv() => self.handle_input(input).await,
                Some(message) = inputs.signals.recv() => self.handle_signal(message).await,
                Some(update) = inputs.elevations.recv() => self.handle_elevation(update),
            }
        }
        info!(target: "Session", "Session stopped");
    }

    async fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Send { command, reply } => {
                let _ = reply.send(self.send_command(command).await);
            }
            ConsoleCommand::Negotiate { offer, reply } => {
                let _ = reply.send(self.negotiate(offer).await);
            }
            ConsoleCommand::SetControlMode(mode) => self.set_control_mode(mode),
            ConsoleCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Negotiated { generation, result } => {
                if generation != self.generation {
                    debug!(target: "Session", "Discarding superseded negotiation");
                    if let Ok(negotiated) = result {
                        negotiated.link.close().await;
                    }
                    return;
                }
                match result {
                    Ok(negotiated) => self.on_negotiated(negotiated).await,
                    Err(e) => self.fail(&format!("negotiation failed: {e:#}")).await,
                }
            }
            Input::Peer { generation, event } => {
                if generation == self.generation {
                    self.handle_peer_event(event).await;
                }
            }
            Input::Tick { generation, timer } => {
                if generation == self.generation {
                    self.handle_tick(timer).await;
                }
            }
        }
    }

    async fn handle_signal(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::Offer(offer) => {
                if let Err(e) = self.negotiate(offer).await {
                    warn!(target: "Session", "Offer rejected: {e}");
                }
            }
            SignalMessage::IceCandidate(candidate) => match &self.link {
                Some(link) => {
                    if let Err(e) = link.add_remote_candidate(candidate).await {
                        warn!(target: "Session", "Failed to add remote candidate: {e:#}");
                    }
                }
                None => debug!(target: "Session", "Ignoring candidate without a peer session"),
            },
            SignalMessage::Answer(_) | SignalMessage::AdminReady => {
                debug!(target: "Session", "Ignoring {} from relay", message.event_name());
            }
        }
    }

    /// Accepts a remote offer, replacing any existing peer session.
    async fn negotiate(&mut self, offer: SessionDescription) -> Result<(), SessionError> {
        validate_offer(&offer)?;
        if self.state.is_closed() {
            return Err(SessionError::Closed);
        }

        if self.link.is_some() || self.state != ConnectionState::Idle {
            info!(target: "Session", "New offer supersedes the current session");
        }
        self.teardown().await;
        self.transition(ConnectionTransition::OfferAccepted)?;
        self.classifier = TrackClassifier::new(self.config.track_labels.clone(), offer.video_mids());

        let generation = self.generation;
        let connector = self.connector.clone();
        let ice_servers = self.config.ice_servers.clone();
        let inputs = self.inputs_tx.clone();
        self.tasks.replace(
            TaskSlot::Negotiation,
            tokio::spawn(async move {
                let result = connector.accept(&offer, &ice_servers).await;
                let _ = inputs.send(Input::Negotiated { generation, result }).await;
            }),
        );
        Ok(())
    }

    async fn on_negotiated(&mut self, negotiated: Negotiated) {
        let Negotiated {
            link,
            answer,
            mut events,
        } = negotiated;
        self.link = Some(link);

        let generation = self.generation;
        let inputs = self.inputs_tx.clone();
        self.tasks.replace(
            TaskSlot::PeerEvents,
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if inputs.send(Input::Peer { generation, event }).await.is_err() {
                        break;
                    }
                }
            }),
        );

        info!(target: "Session", "Answer ready, sending to relay");
        if self.signal_out.send(SignalMessage::Answer(answer)).await.is_err() {
            error!(target: "Session", "Signaling channel closed, answer not sent");
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Track(track) => self.bind_track(track),
            PeerEvent::MediaActivity { track_id } => {
                if let Some(role) = self.classifier.role_of(&track_id) {
                    self.video.record(role, Instant::now());
                }
            }
            PeerEvent::DataChannelOpen => self.on_channel_open(),
            PeerEvent::Message(text) => self.handle_message(&text),
            PeerEvent::DataChannelClosed => self.fail("data channel closed").await,
            PeerEvent::Failed(reason) => self.fail(&reason).await,
            PeerEvent::Closed => self.fail("peer session closed").await,
        }
    }

    fn bind_track(&mut self, track: TrackInfo) {
        let Some(binding) = self.classifier.classify(track) else {
            return;
        };
        let Some(link) = &self.link else {
            return;
        };
        if let Some(old) = &binding.replaced {
            info!(target: "Session", "Track {} replaces {} as {}", binding.track.id, old.id, binding.role.as_str());
            link.release_track(&old.id);
            self.video.forget(binding.role);
            EventBus::publish(
                &self.bus.video_slot,
                VideoSlotEvent::Released {
                    role: binding.role,
                    track_id: old.id.clone(),
                },
            );
        } else {
            info!(target: "Session", "Track {} bound as {}", binding.track.id, binding.role.as_str());
        }
        link.bind_track(&binding.track.id, binding.role);
        EventBus::publish(
            &self.bus.video_slot,
            VideoSlotEvent::Bound {
                role: binding.role,
                track_id: binding.track.id,
            },
        );
    }

    fn on_channel_open(&mut self) {
        if let Err(e) = self.transition(ConnectionTransition::DataChannelOpened) {
            warn!(target: "Session", "Ignoring data channel open: {e}");
            return;
        }
        self.heartbeat = HeartbeatState::new(Instant::now());
        self.start_ticker(Timer::Heartbeat, HEARTBEAT_INTERVAL);
        self.start_ticker(Timer::Liveness, LIVENESS_CHECK_INTERVAL);
        self.start_ticker(Timer::VideoWatchdog, VIDEO_WATCHDOG_INTERVAL);
        if self.mode == ControlMode::Manual {
            self.start_ticker(Timer::Joystick, JOYSTICK_POLL_INTERVAL);
        }
    }

    fn start_ticker(&mut self, timer: Timer, period: Duration) {
        let handle = spawn_ticker(self.inputs_tx.clone(), self.generation, timer, period);
        self.tasks.replace(TaskSlot::Timer(timer), handle);
    }

    fn handle_message(&mut self, text: &str) {
        if text.trim() == HEARTBEAT_TOKEN {
            self.record_signal();
            return;
        }
        match Telemetry::decode(text) {
            Ok(telemetry) => {
                self.record_signal();
                self.handle_telemetry(telemetry);
            }
            Err(DecodeError::UnknownPrefix(prefix)) => {
                debug!(target: "Session", "Ignoring message with unknown prefix {prefix}");
            }
            Err(e) => warn!(target: "Session", "Dropping malformed message: {e}"),
        }
    }

    fn handle_telemetry(&mut self, telemetry: Telemetry) {
        match telemetry {
            Telemetry::Heartbeat => {}
            Telemetry::Location {
                lat,
                lon,
                relative_altitude,
                msl_altitude,
            } => {
                let key = ElevationKey::new(lat, lon);
                let cached = if self.position.needs_lookup(&key) {
                    self.elevation.get(&key)
                } else {
                    self.elevation.cached(&key)
                };
                let position = self
                    .position
                    .update(lat, lon, relative_altitude, msl_altitude, cached);
                EventBus::publish(&self.bus.position, position);
            }
            Telemetry::CaptureSuccess { timestamp } => {
                let request_id = self.resolve_request(&[RequestKind::Capture]);
                EventBus::publish(
                    &self.bus.capture,
                    CaptureEvent::Succeeded {
                        request_id,
                        timestamp,
                    },
                );
            }
            Telemetry::CaptureError { message } => {
                let request_id = self.resolve_request(&[RequestKind::Capture]);
                EventBus::publish(&self.bus.capture, CaptureEvent::Failed { request_id, message });
            }
            Telemetry::VideoStarted { timestamp, fps } => {
                let request_id = self.resolve_request(&[RequestKind::RecordingStart]);
                EventBus::publish(
                    &self.bus.recording,
                    RecordingEvent::Started {
                        request_id,
                        timestamp,
                        fps,
                    },
                );
            }
            Telemetry::VideoStopped {
                timestamp,
                normal_frames,
                thermal_frames,
                thermal_data_frames,
            } => {
                let request_id = self.resolve_request(&[RequestKind::RecordingStop]);
                EventBus::publish(
                    &self.bus.recording,
                    RecordingEvent::Stopped {
                        request_id,
                        timestamp,
                        normal_frames,
                        thermal_frames,
                        thermal_data_frames,
                    },
                );
            }
            Telemetry::VideoError { message } => {
                let request_id =
                    self.resolve_request(&[RequestKind::RecordingStart, RequestKind::RecordingStop]);
                EventBus::publish(&self.bus.recording, RecordingEvent::Failed { request_id, message });
            }
            Telemetry::ThermalDetectRegionsStatus { enabled } => {
                EventBus::publish(&self.bus.thermal, ThermalStatus::DetectRegions { enabled });
            }
            Telemetry::ThermalDetectionModeStatus { mode } => {
                EventBus::publish(&self.bus.thermal, ThermalStatus::DetectionMode { mode });
            }
            Telemetry::ThermalHudStatus { visible } => {
                EventBus::publish(&self.bus.thermal, ThermalStatus::Hud { visible });
            }
            Telemetry::ThermalError { message } => {
                EventBus::publish(&self.bus.thermal, ThermalStatus::Error { message });
            }
            Telemetry::GotoStarted { lat, lon, altitude } => {
                EventBus::publish(&self.bus.goto, GotoEvent::Started { lat, lon, altitude });
            }
            Telemetry::GotoError { message } => {
                EventBus::publish(&self.bus.goto, GotoEvent::Failed { message });
            }
            Telemetry::SurveillanceStarted { points } => {
                EventBus::publish(&self.bus.mission, MissionEvent::Started { points });
            }
            Telemetry::SurveillanceError { message } => {
                EventBus::publish(&self.bus.mission, MissionEvent::Failed { message });
            }
        }
    }

    fn resolve_request(&mut self, kinds: &[RequestKind]) -> Option<String> {
        match self.requests.resolve(kinds) {
            Some(resolved) if resolved.late => {
                info!(
                    target: "Session",
                    "Late {} response for {} after {:?}",
                    resolved.request.kind.as_str(),
                    resolved.request.id,
                    resolved.request.age(Instant::now())
                );
                Some(resolved.request.id)
            }
            Some(resolved) => Some(resolved.request.id),
            None => {
                debug!(target: "Session", "Unsolicited response, no pending request");
                None
            }
        }
    }

    fn handle_elevation(&mut self, update: ElevationUpdate) {
        if let Some(position) = self.position.resolve(update.key, update.elevation) {
            EventBus::publish(&self.bus.position, position);
        }
    }

    async fn handle_tick(&mut self, timer: Timer) {
        match timer {
            Timer::Heartbeat => self.send_heartbeat().await,
            Timer::Liveness => self.check_liveness(),
            Timer::VideoWatchdog => self.check_video_health(),
            Timer::Joystick => self.poll_joystick().await,
            Timer::Requests => self.expire_requests(),
        }
    }

    async fn poll_joystick(&mut self) {
        if self.mode != ControlMode::Manual || !self.state.is_connected() {
            return;
        }
        let Some(link) = self.link.clone() else {
            return;
        };
        let snapshot = self.gamepad.borrow().clone();
        let revision = self.sampler.frame().revision;
        let commands = self.sampler.tick(&snapshot);
        for command in commands {
            if let Err(e) = link.send_text(&command.encode()).await {
                warn!(target: "Joystick", "Failed to send {command}: {e:#}");
            }
        }
        let frame = self.sampler.frame();
        if frame.revision != revision {
            EventBus::publish(&self.bus.actuator, frame);
        }
    }

    fn set_control_mode(&mut self, mode: ControlMode) {
        if self.mode == mode {
            return;
        }
        info!(target: "Session", "Control mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        match mode {
            ControlMode::Manual => {
                self.sampler.reset();
                EventBus::publish(&self.bus.actuator, self.sampler.frame());
                if self.state.is_connected() {
                    self.start_ticker(Timer::Joystick, JOYSTICK_POLL_INTERVAL);
                }
            }
            ControlMode::Auto => self.tasks.cancel(TaskSlot::Timer(Timer::Joystick)),
        }
    }

    /// Sends a command on the data channel. Returns the correlation id when
    /// the command opens a pending request.
    async fn send_command(&mut self, command: Command) -> Result<Option<String>, SessionError> {
        if !self.state.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let link = self.link.clone().ok_or(SessionError::NotConnected)?;

        let request = match command.request_kind() {
            Some(kind) => Some(self.requests.issue(kind, Instant::now())?),
            None => None,
        };

        if let Err(e) = link.send_text(&command.encode()).await {
            if let Some(request) = &request {
                self.requests.cancel(&request.id);
            }
            return Err(SessionError::Send(format!("{e:#}")));
        }

        if let Some(request) = &request {
            debug!(target: "Session", "Sent {command}, awaiting ack as {}", request.id);
            self.schedule_request_timer();
        }
        Ok(request.map(|r| r.id))
    }

    fn schedule_request_timer(&mut self) {
        match self.requests.next_deadline() {
            Some(at) => {
                let handle = spawn_deadline(self.inputs_tx.clone(), self.generation, Timer::Requests, at);
                self.tasks.replace(TaskSlot::Timer(Timer::Requests), handle);
            }
            None => self.tasks.cancel(TaskSlot::Timer(Timer::Requests)),
        }
    }

    fn expire_requests(&mut self) {
        let now = Instant::now();
        for request in self.requests.expire(now) {
            warn!(
                target: "Session",
                "{} request {} timed out after {:?}",
                request.kind.as_str(),
                request.id,
                request.age(now)
            );
            match request.kind {
                RequestKind::Capture => EventBus::publish(
                    &self.bus.capture,
                    CaptureEvent::TimedOut {
                        request_id: request.id,
                    },
                ),
                RequestKind::RecordingStart | RequestKind::RecordingStop => EventBus::publish(
                    &self.bus.recording,
                    RecordingEvent::TimedOut {
                        request_id: request.id,
                    },
                ),
            }
        }
        self.schedule_request_timer();
    }

    fn transition(&mut self, transition: ConnectionTransition) -> Result<(), InvalidTransition> {
        let previous = self.state;
        let current = apply_transition(previous, transition)?;
        if current != previous {
            info!(target: "Session", "State {previous} -> {current}");
            self.state = current;
            self.state_tx.send_replace(current);
            EventBus::publish(
                &self.bus.state,
                StateChanged {
                    previous,
                    current,
                    at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// Failed, torn down, back to Idle.
    async fn fail(&mut self, reason: &str) {
        if self.transition(ConnectionTransition::SessionFailed).is_err() {
            debug!(target: "Session", "Ignoring failure in state {}: {reason}", self.state);
            return;
        }
        warn!(target: "Session", "Session failed: {reason}");
        self.teardown().await;
        if let Err(e) = self.transition(ConnectionTransition::Reset) {
            error!(target: "Session", "{e}");
        }
    }

    /// Releases everything owned by the current session generation.
    async fn teardown(&mut self) {
        self.generation += 1;
        self.tasks.abort_all();
        if let Some(link) = self.link.take() {
            link.close().await;
        }

        for role in VideoRole::ALL {
            if let Some(track) = self.classifier.bound(role) {
                EventBus::publish(
                    &self.bus.video_slot,
                    VideoSlotEvent::Released {
                        role,
                        track_id: track.id.clone(),
                    },
                );
            }
        }
        self.classifier.reset();
        self.video = VideoActivity::default();

        for request in self.requests.clear() {
            debug!(target: "Session", "Dropping {} request {}", request.kind.as_str(), request.id);
        }

        self.sampler.reset();
        EventBus::publish(&self.bus.actuator, self.sampler.frame());
    }

    async fn shutdown(&mut self) {
        if self.state.is_closed() {
            return;
        }
        info!(target: "Session", "Shutting down");
        self.teardown().await;
        if let Err(e) = self.transition(ConnectionTransition::Shutdown) {
            error!(target: "Session", "{e}");
        }
    }
}
