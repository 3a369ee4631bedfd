//! Outbound command grammar.
//!
//! Every command is one colon-delimited text frame; the family prefix selects
//! the parser on the vehicle.

use super::HEARTBEAT_TOKEN;
use crate::mission::MissionRequest;
use crate::requests::RequestKind;
use std::fmt;

/// A manual stick direction, as sent by the on-screen controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stick {
    ThrottleUp,
    ThrottleDown,
    YawLeft,
    YawRight,
    PitchForward,
    PitchBackward,
    RollLeft,
    RollRight,
}

impl Stick {
    pub fn token(self) -> &'static str {
        match self {
            Stick::ThrottleUp => "THROTTLE_UP",
            Stick::ThrottleDown => "THROTTLE_DOWN",
            Stick::YawLeft => "YAW_LEFT",
            Stick::YawRight => "YAW_RIGHT",
            Stick::PitchForward => "PITCH_FORWARD",
            Stick::PitchBackward => "PITCH_BACKWARD",
            Stick::RollLeft => "ROLL_LEFT",
            Stick::RollRight => "ROLL_RIGHT",
        }
    }
}

/// Autonomous actions executed by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoAction {
    Arm,
    Takeoff,
    Land,
    ReturnToLaunch,
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

impl AutoAction {
    pub fn token(self) -> &'static str {
        match self {
            AutoAction::Arm => "ARM",
            AutoAction::Takeoff => "TAKEOFF",
            AutoAction::Land => "LAND",
            AutoAction::ReturnToLaunch => "RETURN_TO_LAUNCH",
            AutoAction::Forward => "FORWARD",
            AutoAction::Backward => "BACKWARD",
            AutoAction::Left => "LEFT",
            AutoAction::Right => "RIGHT",
            AutoAction::Up => "UP",
            AutoAction::Down => "DOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TiltDirection {
    Up,
    Down,
}

/// Which side of the detection threshold the thermal camera highlights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Over,
    Under,
}

impl DetectionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "over" => Some(DetectionMode::Over),
            "under" => Some(DetectionMode::Under),
            _ => None,
        }
    }

    fn wire(self) -> &'static str {
        match self {
            DetectionMode::Over => "OVER",
            DetectionMode::Under => "UNDER",
        }
    }
}

/// Thermal camera settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalSetting {
    Colormap(u8),
    Contrast(f32),
    Blur(u32),
    /// Rotation in degrees; normalized into [0, 360) on the wire.
    Rotate(i32),
    Threshold(f32),
    DetectRegions(bool),
    DetectionMode(DetectionMode),
    ToggleHud,
    ToggleActive,
}

/// RGB colour for the vehicle LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LedColor {
    /// Builds a colour from unbounded components, clamping each to [0, 255].
    pub fn clamped(r: i32, g: i32, b: i32) -> Self {
        let c = |v: i32| v.clamp(0, 255) as u8;
        Self {
            r: c(r),
            g: c(g),
            b: c(b),
        }
    }
}

pub const VIDEO_FPS_MIN: f32 = 0.1;
pub const VIDEO_FPS_MAX: f32 = 30.0;

/// A console → vehicle command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Manual(Stick),
    ManualStop(Stick),
    ManualPwm { channel: u8, value: u16 },
    Auto(AutoAction),
    CameraTilt(TiltDirection),
    LedSetColor(LedColor),
    LedOff,
    Thermal(ThermalSetting),
    CaptureImages,
    VideoStart { fps: f32 },
    VideoStop,
    Goto { lat: f64, lon: f64, altitude: f64 },
    StartSurveillance(MissionRequest),
    Heartbeat,
}

impl Command {
    /// Encodes the command into its wire form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// The pending request this command opens, if the vehicle acknowledges it.
    pub fn request_kind(&self) -> Option<RequestKind> {
        match self {
            Command::CaptureImages => Some(RequestKind::Capture),
            Command::VideoStart { .. } => Some(RequestKind::RecordingStart),
            Command::VideoStop => Some(RequestKind::RecordingStop),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Manual(stick) => write!(f, "MANUAL_{}", stick.token()),
            Command::ManualStop(stick) => write!(f, "MANUAL_{}_STOP", stick.token()),
            Command::ManualPwm { channel, value } => write!(f, "MANUAL_PWM:{channel}:{value}"),
            Command::Auto(action) => write!(f, "AUTO_{}", action.token()),
            Command::CameraTilt(TiltDirection::Up) => f.write_str("CAMERA_TILT_UP"),
            Command::CameraTilt(TiltDirection::Down) => f.write_str("CAMERA_TILT_DOWN"),
            Command::LedSetColor(c) => write!(f, "LED_SET_COLOR:{},{},{}", c.r, c.g, c.b),
            Command::LedOff => f.write_str("LED_OFF"),
            Command::Thermal(setting) => match setting {
                ThermalSetting::Colormap(idx) => write!(f, "THERMAL_COLORMAP:{idx}"),
                ThermalSetting::Contrast(v) => write!(f, "THERMAL_CONTRAST:{v}"),
                ThermalSetting::Blur(v) => write!(f, "THERMAL_BLUR:{v}"),
                ThermalSetting::Rotate(deg) => write!(f, "THERMAL_ROTATE:{}", deg.rem_euclid(360)),
                ThermalSetting::Threshold(v) => write!(f, "THERMAL_THRESHOLD:{v}"),
                ThermalSetting::DetectRegions(on) => write!(f, "THERMAL_DETECT_REGIONS:{on}"),
                ThermalSetting::DetectionMode(mode) => {
                    write!(f, "THERMAL_DETECTION_MODE:{}", mode.wire())
                }
                ThermalSetting::ToggleHud => f.write_str("THERMAL_TOGGLE_HUD"),
                ThermalSetting::ToggleActive => f.write_str("THERMAL_TOGGLE_ACTIVE"),
            },
            Command::CaptureImages => f.write_str("CAPTURE_IMAGES"),
            Command::VideoStart { fps } => {
                let fps = if fps.is_finite() {
                    fps.clamp(VIDEO_FPS_MIN, VIDEO_FPS_MAX)
                } else {
                    1.0
                };
                write!(f, "VIDEO_START:{fps}")
            }
            Command::VideoStop => f.write_str("VIDEO_STOP"),
            Command::Goto { lat, lon, altitude } => write!(f, "GOTO:{lat}:{lon}:{altitude}"),
            Command::StartSurveillance(request) => write!(f, "{request}"),
            Command::Heartbeat => f.write_str(HEARTBEAT_TOKEN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_stick_tokens() {
        assert_eq!(Command::Manual(Stick::ThrottleUp).encode(), "MANUAL_THROTTLE_UP");
        assert_eq!(
            Command::ManualStop(Stick::PitchBackward).encode(),
            "MANUAL_PITCH_BACKWARD_STOP"
        );
        assert_eq!(
            Command::ManualPwm {
                channel: 3,
                value: 1420
            }
            .encode(),
            "MANUAL_PWM:3:1420"
        );
    }

    #[test]
    fn test_auto_and_tilt() {
        assert_eq!(
            Command::Auto(AutoAction::ReturnToLaunch).encode(),
            "AUTO_RETURN_TO_LAUNCH"
        );
        assert_eq!(Command::CameraTilt(TiltDirection::Down).encode(), "CAMERA_TILT_DOWN");
    }

    #[test]
    fn test_led_components_are_clamped() {
        let color = LedColor::clamped(-20, 128, 999);
        assert_eq!(Command::LedSetColor(color).encode(), "LED_SET_COLOR:0,128,255");
    }

    #[test]
    fn test_thermal_value_formats() {
        assert_eq!(
            Command::Thermal(ThermalSetting::Rotate(450)).encode(),
            "THERMAL_ROTATE:90"
        );
        assert_eq!(
            Command::Thermal(ThermalSetting::Rotate(-90)).encode(),
            "THERMAL_ROTATE:270"
        );
        assert_eq!(
            Command::Thermal(ThermalSetting::DetectRegions(false)).encode(),
            "THERMAL_DETECT_REGIONS:false"
        );
        assert_eq!(
            Command::Thermal(ThermalSetting::DetectionMode(DetectionMode::Under)).encode(),
            "THERMAL_DETECTION_MODE:UNDER"
        );
        assert_eq!(
            Command::Thermal(ThermalSetting::Contrast(1.5)).encode(),
            "THERMAL_CONTRAST:1.5"
        );
    }

    #[test]
    fn test_video_start_fps_is_clamped() {
        assert_eq!(Command::VideoStart { fps: 2.0 }.encode(), "VIDEO_START:2");
        assert_eq!(Command::VideoStart { fps: 120.0 }.encode(), "VIDEO_START:30");
        assert_eq!(Command::VideoStart { fps: 0.0 }.encode(), "VIDEO_START:0.1");
    }

    #[test]
    fn test_goto_and_heartbeat() {
        assert_eq!(
            Command::Goto {
                lat: 46.77,
                lon: 23.59,
                altitude: 30.0
            }
            .encode(),
            "GOTO:46.77:23.59:30"
        );
        assert_eq!(Command::Heartbeat.encode(), "heartbeat");
    }

    #[test]
    fn test_request_kinds() {
        assert_eq!(Command::CaptureImages.request_kind(), Some(RequestKind::Capture));
        assert_eq!(
            Command::VideoStart { fps: 5.0 }.request_kind(),
            Some(RequestKind::RecordingStart)
        );
        assert_eq!(Command::VideoStop.request_kind(), Some(RequestKind::RecordingStop));
        assert_eq!(Command::Heartbeat.request_kind(), None);
        assert_eq!(Command::LedOff.request_kind(), None);
    }
}
