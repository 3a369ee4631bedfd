//! Inbound telemetry grammar.
//!
//! Decoding is total: every string yields a typed [`Telemetry`] or a
//! [`DecodeError`] the caller logs and drops.

use super::HEARTBEAT_TOKEN;
use super::command::DetectionMode;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown message prefix: {0}")]
    UnknownPrefix(String),
    #[error("{prefix}: expected {expected} fields, got {got}")]
    FieldCount {
        prefix: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("{prefix}: invalid {field} value {value:?}")]
    InvalidField {
        prefix: &'static str,
        field: &'static str,
        value: String,
    },
}

/// A vehicle → console message.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Heartbeat,
    Location {
        lat: f64,
        lon: f64,
        relative_altitude: f64,
        msl_altitude: f64,
    },
    CaptureSuccess {
        timestamp: String,
    },
    CaptureError {
        message: String,
    },
    VideoStarted {
        timestamp: String,
        fps: Option<f64>,
    },
    VideoStopped {
        timestamp: String,
        normal_frames: u64,
        thermal_frames: u64,
        thermal_data_frames: u64,
    },
    VideoError {
        message: String,
    },
    ThermalDetectRegionsStatus {
        enabled: bool,
    },
    ThermalDetectionModeStatus {
        mode: DetectionMode,
    },
    ThermalHudStatus {
        visible: bool,
    },
    ThermalError {
        message: String,
    },
    GotoStarted {
        lat: f64,
        lon: f64,
        altitude: f64,
    },
    GotoError {
        message: String,
    },
    SurveillanceStarted {
        points: usize,
    },
    SurveillanceError {
        message: String,
    },
}

impl Telemetry {
    /// Decodes one data-channel frame.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(DecodeError::Empty);
        }
        if frame == HEARTBEAT_TOKEN {
            return Ok(Telemetry::Heartbeat);
        }

        let (prefix, rest) = match frame.split_once(':') {
            Some((prefix, rest)) => (prefix, Some(rest)),
            None => (frame, None),
        };

        match prefix {
            "LOCATION" => {
                const P: &str = "LOCATION";
                let fields = fields_exact(P, rest, 4, "4")?;
                Ok(Telemetry::Location {
                    lat: float(P, "lat", fields[0])?,
                    lon: float(P, "lon", fields[1])?,
                    relative_altitude: float(P, "relative altitude", fields[2])?,
                    msl_altitude: float(P, "msl altitude", fields[3])?,
                })
            }
            "CAPTURE_SUCCESS" => Ok(Telemetry::CaptureSuccess {
                timestamp: required("CAPTURE_SUCCESS", rest)?.to_string(),
            }),
            "CAPTURE_ERROR" => Ok(Telemetry::CaptureError {
                message: message(rest),
            }),
            "VIDEO_STARTED" => {
                const P: &str = "VIDEO_STARTED";
                let fields: Vec<&str> = required(P, rest)?.split(':').collect();
                match fields.as_slice() {
                    [ts] => Ok(Telemetry::VideoStarted {
                        timestamp: ts.to_string(),
                        fps: None,
                    }),
                    [ts, fps] => Ok(Telemetry::VideoStarted {
                        timestamp: ts.to_string(),
                        fps: Some(float(P, "fps", fps)?),
                    }),
                    other => Err(DecodeError::FieldCount {
                        prefix: P,
                        expected: "1 or 2",
                        got: other.len(),
                    }),
                }
            }
            "VIDEO_STOPPED" => {
                const P: &str = "VIDEO_STOPPED";
                let fields = fields_exact(P, rest, 4, "4")?;
                Ok(Telemetry::VideoStopped {
                    timestamp: fields[0].to_string(),
                    normal_frames: count(P, "normal", fields[1])?,
                    thermal_frames: count(P, "thermal", fields[2])?,
                    thermal_data_frames: count(P, "thermal data", fields[3])?,
                })
            }
            "VIDEO_ERROR" => Ok(Telemetry::VideoError {
                message: message(rest),
            }),
            "THERMAL_DETECT_REGIONS_STATUS" => {
                const P: &str = "THERMAL_DETECT_REGIONS_STATUS";
                let value = required(P, rest)?;
                let enabled = match value {
                    "enabled" => true,
                    "disabled" => false,
                    other => return Err(invalid(P, "status", other)),
                };
                Ok(Telemetry::ThermalDetectRegionsStatus { enabled })
            }
            "THERMAL_DETECTION_MODE_STATUS" => {
                const P: &str = "THERMAL_DETECTION_MODE_STATUS";
                let value = required(P, rest)?;
                let mode = DetectionMode::parse(value).ok_or_else(|| invalid(P, "mode", value))?;
                Ok(Telemetry::ThermalDetectionModeStatus { mode })
            }
            "THERMAL_HUD_STATUS" => {
                const P: &str = "THERMAL_HUD_STATUS";
                let value = required(P, rest)?;
                let visible = match value {
                    "ON" => true,
                    "OFF" => false,
                    other => return Err(invalid(P, "status", other)),
                };
                Ok(Telemetry::ThermalHudStatus { visible })
            }
            "THERMAL_ERROR" => Ok(Telemetry::ThermalError {
                message: message(rest),
            }),
            "GOTO_STARTED" => {
                const P: &str = "GOTO_STARTED";
                let fields = fields_exact(P, rest, 3, "3")?;
                Ok(Telemetry::GotoStarted {
                    lat: float(P, "lat", fields[0])?,
                    lon: float(P, "lon", fields[1])?,
                    altitude: float(P, "altitude", fields[2])?,
                })
            }
            "GOTO_ERROR" => Ok(Telemetry::GotoError {
                message: message(rest),
            }),
            "SURVEILLANCE_STARTED" => {
                const P: &str = "SURVEILLANCE_STARTED";
                let value = required(P, rest)?;
                let points = value
                    .parse::<usize>()
                    .map_err(|_| invalid(P, "points", value))?;
                Ok(Telemetry::SurveillanceStarted { points })
            }
            "SURVEILLANCE_ERROR" => Ok(Telemetry::SurveillanceError {
                message: message(rest),
            }),
            other => Err(DecodeError::UnknownPrefix(other.to_string())),
        }
    }
}

fn required<'a>(prefix: &'static str, rest: Option<&'a str>) -> Result<&'a str, DecodeError> {
    match rest {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DecodeError::FieldCount {
            prefix,
            expected: "1",
            got: 0,
        }),
    }
}

fn fields_exact<'a>(
    prefix: &'static str,
    rest: Option<&'a str>,
    n: usize,
    expected: &'static str,
) -> Result<Vec<&'a str>, DecodeError> {
    let fields: Vec<&str> = rest.map(|r| r.split(':').collect()).unwrap_or_default();
    if fields.len() != n {
        return Err(DecodeError::FieldCount {
            prefix,
            expected,
            got: fields.len(),
        });
    }
    Ok(fields)
}

fn float(prefix: &'static str, field: &'static str, value: &str) -> Result<f64, DecodeError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(prefix, field, value))
}

fn count(prefix: &'static str, field: &'static str, value: &str) -> Result<u64, DecodeError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid(prefix, field, value))
}

fn invalid(prefix: &'static str, field: &'static str, value: &str) -> DecodeError {
    DecodeError::InvalidField {
        prefix,
        field,
        value: value.to_string(),
    }
}

fn message(rest: Option<&str>) -> String {
    rest.unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_location() {
        assert_eq!(
            Telemetry::decode("LOCATION:46.77:23.59:12.0:450.0"),
            Ok(Telemetry::Location {
                lat: 46.77,
                lon: 23.59,
                relative_altitude: 12.0,
                msl_altitude: 450.0,
            })
        );
    }

    #[test]
    fn test_location_field_validation() {
        assert!(matches!(
            Telemetry::decode("LOCATION:46.77:23.59:12.0"),
            Err(DecodeError::FieldCount { got: 3, .. })
        ));
        assert!(matches!(
            Telemetry::decode("LOCATION:46.77:23.59:12.0:450.0:1"),
            Err(DecodeError::FieldCount { got: 5, .. })
        ));
        assert!(matches!(
            Telemetry::decode("LOCATION:46.77:abc:12.0:450.0"),
            Err(DecodeError::InvalidField { field: "lon", .. })
        ));
        assert!(Telemetry::decode("LOCATION:NaN:1:1:1").is_err());
        assert!(Telemetry::decode("LOCATION").is_err());
    }

    #[test]
    fn test_decode_heartbeat_and_unknown() {
        assert_eq!(Telemetry::decode("heartbeat"), Ok(Telemetry::Heartbeat));
        assert_eq!(
            Telemetry::decode("FOO:bar"),
            Err(DecodeError::UnknownPrefix("FOO".to_string()))
        );
        assert_eq!(Telemetry::decode(""), Err(DecodeError::Empty));
    }

    #[test]
    fn test_error_messages_keep_colons() {
        assert_eq!(
            Telemetry::decode("CAPTURE_ERROR:disk: full"),
            Ok(Telemetry::CaptureError {
                message: "disk: full".to_string()
            })
        );
        assert_eq!(
            Telemetry::decode("VIDEO_ERROR"),
            Ok(Telemetry::VideoError {
                message: String::new()
            })
        );
    }

    #[test]
    fn test_video_started_optional_fps() {
        assert_eq!(
            Telemetry::decode("VIDEO_STARTED:20240501_101500"),
            Ok(Telemetry::VideoStarted {
                timestamp: "20240501_101500".to_string(),
                fps: None
            })
        );
        assert_eq!(
            Telemetry::decode("VIDEO_STARTED:20240501_101500:1.0"),
            Ok(Telemetry::VideoStarted {
                timestamp: "20240501_101500".to_string(),
                fps: Some(1.0)
            })
        );
        assert!(Telemetry::decode("VIDEO_STARTED:ts:fast").is_err());
        assert!(Telemetry::decode("VIDEO_STARTED:").is_err());
    }

    #[test]
    fn test_video_stopped_counts() {
        assert_eq!(
            Telemetry::decode("VIDEO_STOPPED:20240501_101600:300:299:60"),
            Ok(Telemetry::VideoStopped {
                timestamp: "20240501_101600".to_string(),
                normal_frames: 300,
                thermal_frames: 299,
                thermal_data_frames: 60,
            })
        );
        assert!(Telemetry::decode("VIDEO_STOPPED:ts:1:2").is_err());
        assert!(Telemetry::decode("VIDEO_STOPPED:ts:1:-2:3").is_err());
    }

    #[test]
    fn test_thermal_status_messages() {
        assert_eq!(
            Telemetry::decode("THERMAL_DETECT_REGIONS_STATUS:enabled"),
            Ok(Telemetry::ThermalDetectRegionsStatus { enabled: true })
        );
        assert!(Telemetry::decode("THERMAL_DETECT_REGIONS_STATUS:maybe").is_err());
        assert_eq!(
            Telemetry::decode("THERMAL_DETECTION_MODE_STATUS:under"),
            Ok(Telemetry::ThermalDetectionModeStatus {
                mode: DetectionMode::Under
            })
        );
        assert_eq!(
            Telemetry::decode("THERMAL_HUD_STATUS:OFF"),
            Ok(Telemetry::ThermalHudStatus { visible: false })
        );
    }

    #[test]
    fn test_mission_and_goto_acks() {
        assert_eq!(
            Telemetry::decode("SURVEILLANCE_STARTED:4"),
            Ok(Telemetry::SurveillanceStarted { points: 4 })
        );
        assert_eq!(
            Telemetry::decode("GOTO_STARTED:46.7:23.5:30.0"),
            Ok(Telemetry::GotoStarted {
                lat: 46.7,
                lon: 23.5,
                altitude: 30.0
            })
        );
    }

    #[test]
    fn test_decode_is_total_over_garbage() {
        let inputs = [
            ":", "::::", "LOCATION:::::", "\u{0}", "CAPTURE_SUCCESS", "VIDEO_STOPPED",
            "THERMAL_DETECTION_MODE_STATUS:", "heartbeat:", "ÿÿÿ", "LOCATION:1e400:0:0:0",
        ];
        for input in inputs {
            // Must not panic; result either way is fine.
            let _ = Telemetry::decode(input);
        }
        assert!(Telemetry::decode("LOCATION:1e400:0:0:0").is_err());
    }
}
