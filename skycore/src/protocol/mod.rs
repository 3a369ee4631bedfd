//! Command/telemetry protocol carried on the session data channel.

pub mod command;
pub mod telemetry;

pub use command::{
    AutoAction, Command, DetectionMode, LedColor, Stick, ThermalSetting, TiltDirection,
};
pub use telemetry::{DecodeError, Telemetry};

/// Liveness token, sent periodically by the console and echoed by the vehicle.
pub const HEARTBEAT_TOKEN: &str = "heartbeat";
