//! Errors surfaced through the console handle.

use skycore::mission::MissionError;
use skycore::requests::RequestError;
use skycore::signaling::SignalingError;
use skycore::state::InvalidTransition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    #[error("malformed offer: {0}")]
    MalformedOffer(#[from] SignalingError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Mission(#[from] MissionError),

    #[error("invalid connection state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("invalid goto target ({lat}, {lon}) at {altitude} m")]
    InvalidGoto { lat: f64, lon: f64, altitude: f64 },

    #[error("data channel send failed: {0}")]
    Send(String),

    #[error("console has shut down")]
    Closed,
}
