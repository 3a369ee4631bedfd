//! Console configuration: an optional JSON file overlaid with CLI flags.

use crate::session::ControlMode;
use clap::Parser;
use serde::Deserialize;
use skycore::elevation::{DEFAULT_CAPACITY, MAX_CAPACITY};
use skycore::joystick::JoystickSettings;
use skycore::peer::{IceServer, VideoRole};
use skycore::tracks::TrackLabels;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:5000/signaling";
pub const DEFAULT_ELEVATION_HOST: &str = "https://api.open-elevation.com/api/v1";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_JOYSTICK_DEVICE: &str = "/dev/input/js0";
/// Relay endpoints used when TURN credentials are given without a URL.
pub const DEFAULT_TURN_URLS: &[&str] = &[
    "turn:relay1.expressturn.com:3480?transport=udp",
    "turn:relay1.expressturn.com:3480?transport=tcp",
    "turn:relay1.expressturn.com:80?transport=tcp",
    "turns:relay1.expressturn.com:443?transport=tcp",
    "turns:relay1.expressturn.com:5349?transport=tcp",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// UDP destinations receiving the raw RTP of each bound video role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VideoSinks {
    pub primary: Option<SocketAddr>,
    pub secondary: Option<SocketAddr>,
}

impl VideoSinks {
    pub fn get(&self, role: VideoRole) -> Option<SocketAddr> {
        match role {
            VideoRole::Primary => self.primary,
            VideoRole::Secondary => self.secondary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub signaling_url: String,
    pub elevation_host: String,
    pub elevation_cache_capacity: usize,
    pub ice_servers: Vec<IceServer>,
    /// `None` disables the input device reader.
    pub joystick_device: Option<PathBuf>,
    pub joystick: JoystickSettings,
    pub control_mode: ControlMode,
    pub track_labels: TrackLabels,
    pub video_sinks: VideoSinks,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            elevation_host: DEFAULT_ELEVATION_HOST.to_string(),
            elevation_cache_capacity: DEFAULT_CAPACITY,
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            joystick_device: Some(PathBuf::from(DEFAULT_JOYSTICK_DEVICE)),
            joystick: JoystickSettings::default(),
            control_mode: ControlMode::default(),
            track_labels: TrackLabels::default(),
            video_sinks: VideoSinks::default(),
        }
    }
}

impl ConsoleConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "signaling url must be ws:// or wss://, got {}",
                self.signaling_url
            )));
        }
        if self.elevation_host.is_empty() {
            return Err(ConfigError::Invalid("elevation host is empty".into()));
        }
        if !(1..=MAX_CAPACITY).contains(&self.elevation_cache_capacity) {
            return Err(ConfigError::Invalid(format!(
                "elevation cache capacity must be in [1, {MAX_CAPACITY}], got {}",
                self.elevation_cache_capacity
            )));
        }
        let deadzone = self.joystick.deadzone;
        if !(0.0..1.0).contains(&deadzone) {
            return Err(ConfigError::Invalid(format!(
                "deadzone must be in [0, 1), got {deadzone}"
            )));
        }
        let rate = self.joystick.throttle_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "throttle rate must be positive, got {rate}"
            )));
        }
        if self.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err(ConfigError::Invalid("ice server without urls".into()));
        }
        if let Some(server) = self
            .ice_servers
            .iter()
            .find(|s| is_turn(s) && (s.username.is_none() || s.credential.is_none()))
        {
            return Err(ConfigError::Invalid(format!(
                "TURN server {} needs a username and credential",
                server.urls.join(",")
            )));
        }
        Ok(())
    }

    /// Whether a TURN relay is configured. Without one, vehicles behind
    /// symmetric NAT cannot be reached.
    pub fn has_relay(&self) -> bool {
        self.ice_servers.iter().any(is_turn)
    }
}

fn is_turn(server: &IceServer) -> bool {
    server
        .urls
        .iter()
        .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
}

/// Command line flags. Anything given here overrides the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "skylink", version, about = "Teleoperation console for a camera drone")]
pub struct Cli {
    /// JSON config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Signaling relay WebSocket URL.
    #[arg(long)]
    pub signaling_url: Option<String>,

    /// Base URL of the elevation service.
    #[arg(long)]
    pub elevation_host: Option<String>,

    /// STUN server URL; repeat for several. Replaces the configured set.
    #[arg(long = "stun")]
    pub stun: Vec<String>,

    /// TURN server URL. Credentials alone select the default relay set.
    #[arg(long)]
    pub turn: Option<String>,

    #[arg(long, requires = "turn_credential")]
    pub turn_username: Option<String>,

    #[arg(long, requires = "turn_username")]
    pub turn_credential: Option<String>,

    /// Joystick device, e.g. /dev/input/js0.
    #[arg(long)]
    pub joystick_device: Option<PathBuf>,

    /// Run without an input device.
    #[arg(long, conflicts_with = "joystick_device")]
    pub no_joystick: bool,

    #[arg(long)]
    pub deadzone: Option<f64>,

    /// PWM units added per tick at full throttle deflection.
    #[arg(long)]
    pub throttle_rate: Option<f64>,

    /// Axis indices as yaw,throttle,roll,pitch.
    #[arg(long, value_delimiter = ',')]
    pub axes: Option<Vec<usize>>,

    /// Camera tilt button indices as up,down.
    #[arg(long, value_delimiter = ',')]
    pub tilt_buttons: Option<Vec<usize>>,

    /// Do not invert the throttle axis.
    #[arg(long)]
    pub no_invert_throttle: bool,

    /// Stream or track id of the primary video.
    #[arg(long)]
    pub primary_label: Option<String>,

    /// Stream or track id of the secondary video.
    #[arg(long)]
    pub secondary_label: Option<String>,

    /// UDP address receiving primary video RTP.
    #[arg(long)]
    pub primary_sink: Option<SocketAddr>,

    /// UDP address receiving secondary video RTP.
    #[arg(long)]
    pub secondary_sink: Option<SocketAddr>,
}

impl Cli {
    /// Loads the config file (if any), applies the flags and validates.
    pub fn into_config(self) -> Result<ConsoleConfig, ConfigError> {
        if self.axes.as_ref().is_some_and(|a| a.len() != 4) {
            return Err(ConfigError::Invalid(
                "--axes takes four indices: yaw,throttle,roll,pitch".into(),
            ));
        }
        if self.tilt_buttons.as_ref().is_some_and(|b| b.len() != 2) {
            return Err(ConfigError::Invalid(
                "--tilt-buttons takes two indices: up,down".into(),
            ));
        }
        let base = match &self.config {
            Some(path) => ConsoleConfig::load(path)?,
            None => ConsoleConfig::default(),
        };
        let config = self.apply(base);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(self, mut config: ConsoleConfig) -> ConsoleConfig {
        if let Some(url) = self.signaling_url {
            config.signaling_url = url;
        }
        if let Some(host) = self.elevation_host {
            config.elevation_host = host;
        }
        if !self.stun.is_empty() {
            config.ice_servers = self.stun.into_iter().map(IceServer::stun).collect();
        }
        let turn_urls = match self.turn {
            Some(turn) => Some(vec![turn]),
            None if self.turn_username.is_some() => {
                Some(DEFAULT_TURN_URLS.iter().map(|u| u.to_string()).collect())
            }
            None => None,
        };
        if let Some(urls) = turn_urls {
            config.ice_servers.push(IceServer {
                urls,
                username: self.turn_username,
                credential: self.turn_credential,
            });
        }
        if self.no_joystick {
            config.joystick_device = None;
        } else if let Some(device) = self.joystick_device {
            config.joystick_device = Some(device);
        }
        if let Some(deadzone) = self.deadzone {
            config.joystick.deadzone = deadzone;
        }
        if let Some(rate) = self.throttle_rate {
            config.joystick.throttle_rate = rate;
        }
        let mapping = &mut config.joystick.mapping;
        if let Some(&[yaw, throttle, roll, pitch]) = self.axes.as_deref() {
            mapping.yaw_axis = yaw;
            mapping.throttle_axis = throttle;
            mapping.roll_axis = roll;
            mapping.pitch_axis = pitch;
        }
        if let Some(&[up, down]) = self.tilt_buttons.as_deref() {
            mapping.tilt_up_button = up;
            mapping.tilt_down_button = down;
        }
        if self.no_invert_throttle {
            mapping.invert_throttle = false;
        }
        if let Some(label) = self.primary_label {
            config.track_labels.primary = Some(label);
        }
        if let Some(label) = self.secondary_label {
            config.track_labels.secondary = Some(label);
        }
        if let Some(addr) = self.primary_sink {
            config.video_sinks.primary = Some(addr);
        }
        if let Some(addr) = self.secondary_sink {
            config.video_sinks.secondary = Some(addr);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConsoleConfig::default();
        config.validate().unwrap();
        assert_eq!(config.elevation_cache_capacity, 100);
        assert_eq!(config.ice_servers.len(), 1);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "signaling_url": "wss://relay.test/ws",
                "joystick": {{ "deadzone": 0.1 }},
                "track_labels": {{ "primary": "thermal" }},
                "video_sinks": {{ "secondary": "127.0.0.1:5004" }},
                "ice_servers": [
                    {{ "urls": ["turn:turn.test:3478"], "username": "u", "credential": "p" }}
                ]
            }}"#
        )
        .unwrap();

        let config = ConsoleConfig::load(file.path()).unwrap();
        assert_eq!(config.signaling_url, "wss://relay.test/ws");
        assert_eq!(config.joystick.deadzone, 0.1);
        assert_eq!(config.joystick.throttle_rate, JoystickSettings::default().throttle_rate);
        assert_eq!(config.track_labels.primary.as_deref(), Some("thermal"));
        assert_eq!(
            config.video_sinks.get(VideoRole::Secondary),
            Some("127.0.0.1:5004".parse().unwrap())
        );
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert_eq!(config.elevation_host, DEFAULT_ELEVATION_HOST);
    }

    #[test]
    fn test_load_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            ConsoleConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConsoleConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "skylink",
            "--signaling-url",
            "wss://other.test/ws",
            "--stun",
            "stun:a.test:3478",
            "--turn",
            "turn:t.test:3478",
            "--turn-username",
            "pilot",
            "--turn-credential",
            "secret",
            "--axes",
            "3,2,1,0",
            "--tilt-buttons",
            "6,7",
            "--no-invert-throttle",
            "--no-joystick",
            "--primary-sink",
            "127.0.0.1:5004",
        ]);
        let config = cli.apply(ConsoleConfig::default());
        assert_eq!(config.signaling_url, "wss://other.test/ws");
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].credential.as_deref(), Some("secret"));
        assert_eq!(config.joystick.mapping.yaw_axis, 3);
        assert_eq!(config.joystick.mapping.pitch_axis, 0);
        assert_eq!(config.joystick.mapping.tilt_down_button, 7);
        assert!(!config.joystick.mapping.invert_throttle);
        assert_eq!(config.joystick_device, None);
        assert!(config.video_sinks.primary.is_some());
    }

    #[test]
    fn test_turn_credentials_select_default_relays() {
        let cli = Cli::parse_from([
            "skylink",
            "--turn-username",
            "pilot",
            "--turn-credential",
            "secret",
        ]);
        let config = cli.into_config().unwrap();
        assert!(config.has_relay());
        let relay = &config.ice_servers[1];
        assert_eq!(relay.urls.len(), DEFAULT_TURN_URLS.len());
        assert_eq!(relay.username.as_deref(), Some("pilot"));
        assert!(!ConsoleConfig::default().has_relay());
    }

    #[test]
    fn test_turn_without_credentials_rejected() {
        let cli = Cli::parse_from(["skylink", "--turn", "turn:t.test:3478"]);
        assert!(matches!(cli.into_config(), Err(ConfigError::Invalid(_))));
        assert!(Cli::try_parse_from(["skylink", "--turn-username", "pilot"]).is_err());
    }

    #[test]
    fn test_cli_rejects_short_axis_list() {
        let cli = Cli::parse_from(["skylink", "--axes", "0,1"]);
        assert!(matches!(cli.into_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = ConsoleConfig {
            signaling_url: "http://relay.test".into(),
            ..ConsoleConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = ConsoleConfig::default();
        config.joystick.deadzone = 1.0;
        assert!(config.validate().is_err());

        let config = ConsoleConfig {
            elevation_cache_capacity: 0,
            ..ConsoleConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ConsoleConfig {
            elevation_cache_capacity: MAX_CAPACITY + 1,
            ..ConsoleConfig::default()
        };
        assert!(config.validate().is_err());
        let config = ConsoleConfig {
            elevation_cache_capacity: MAX_CAPACITY,
            ..ConsoleConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
