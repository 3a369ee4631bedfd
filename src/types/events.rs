use chrono::{DateTime, Utc};
use serde::Serialize;
use skycore::joystick::ActuatorFrame;
use skycore::peer::VideoRole;
use skycore::position::TelemetryPosition;
use skycore::protocol::DetectionMode;
use skycore::state::ConnectionState;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Session
    (state, Arc<StateChanged>),
    (video_slot, Arc<VideoSlotEvent>),
    (video_health, Arc<VideoHealth>),

    // Telemetry
    (position, Arc<TelemetryPosition>),
    (capture, Arc<CaptureEvent>),
    (recording, Arc<RecordingEvent>),
    (thermal, Arc<ThermalStatus>),
    (mission, Arc<MissionEvent>),
    (goto, Arc<GotoEvent>),

    // Manual control
    (actuator, Arc<ActuatorFrame>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Sends on a channel, ignoring the no-subscriber case.
    pub(crate) fn publish<T>(sender: &broadcast::Sender<Arc<T>>, event: T) {
        let _ = sender.send(Arc::new(event));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChanged {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VideoSlotEvent {
    Bound { role: VideoRole, track_id: String },
    Released { role: VideoRole, track_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoHealth {
    pub role: VideoRole,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CaptureEvent {
    Succeeded {
        request_id: Option<String>,
        timestamp: String,
    },
    Failed {
        request_id: Option<String>,
        message: String,
    },
    /// No acknowledgement within the request timeout; local state was reset.
    TimedOut { request_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecordingEvent {
    Started {
        request_id: Option<String>,
        timestamp: String,
        fps: Option<f64>,
    },
    Stopped {
        request_id: Option<String>,
        timestamp: String,
        normal_frames: u64,
        thermal_frames: u64,
        thermal_data_frames: u64,
    },
    Failed {
        request_id: Option<String>,
        message: String,
    },
    TimedOut { request_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ThermalStatus {
    DetectRegions { enabled: bool },
    DetectionMode { mode: DetectionMode },
    Hud { visible: bool },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MissionEvent {
    Started { points: usize },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GotoEvent {
    Started { lat: f64, lon: f64, altitude: f64 },
    Failed { message: String },
}
