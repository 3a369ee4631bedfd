//! Signaling relay envelopes.
//!
//! The relay fans every frame out to all other members of the session without
//! looking inside. Frames are JSON envelopes `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_ICE_CANDIDATE: &str = "ice-candidate";
pub const EVENT_ADMIN_READY: &str = "admin-ready";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("unknown signaling event: {0}")]
    UnknownEvent(String),
    #[error("missing payload for {0}")]
    MissingPayload(&'static str),
    #[error("wrong description type: expected {expected}, got {got}")]
    WrongType { expected: &'static str, got: String },
    #[error("malformed {event} payload: {reason}")]
    Malformed { event: &'static str, reason: String },
}

/// Session description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// An opaque session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Media ids of the video sections, in m-line order.
    pub fn video_mids(&self) -> Vec<String> {
        let mut mids = Vec::new();
        let mut in_video = false;
        for line in self.sdp.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(media) = line.strip_prefix("m=") {
                in_video = media.starts_with("video");
            } else if in_video && let Some(mid) = line.strip_prefix("a=mid:") {
                mids.push(mid.trim().to_string());
                in_video = false;
            }
        }
        mids
    }
}

/// A connectivity candidate relayed out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// One of the four relayed message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    AdminReady,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl SignalMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::Offer(_) => EVENT_OFFER,
            SignalMessage::Answer(_) => EVENT_ANSWER,
            SignalMessage::IceCandidate(_) => EVENT_ICE_CANDIDATE,
            SignalMessage::AdminReady => EVENT_ADMIN_READY,
        }
    }

    /// Serializes the message into a relay envelope.
    pub fn to_json(&self) -> String {
        let data = match self {
            SignalMessage::Offer(desc) | SignalMessage::Answer(desc) => {
                serde_json::to_value(desc).ok()
            }
            SignalMessage::IceCandidate(candidate) => serde_json::to_value(candidate).ok(),
            SignalMessage::AdminReady => None,
        };
        let envelope = Envelope {
            event: self.event_name().to_string(),
            data,
        };
        // An envelope of plain strings and numbers always serializes.
        serde_json::to_string(&envelope).unwrap_or_default()
    }

    /// Parses and validates a relay envelope.
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| SignalingError::InvalidJson(e.to_string()))?;

        match envelope.event.as_str() {
            EVENT_OFFER => parse_description(envelope.data, EVENT_OFFER, SdpType::Offer)
                .map(SignalMessage::Offer),
            EVENT_ANSWER => parse_description(envelope.data, EVENT_ANSWER, SdpType::Answer)
                .map(SignalMessage::Answer),
            EVENT_ICE_CANDIDATE => {
                let data = envelope
                    .data
                    .filter(|v| !v.is_null())
                    .ok_or(SignalingError::MissingPayload(EVENT_ICE_CANDIDATE))?;
                let candidate: IceCandidate =
                    serde_json::from_value(data).map_err(|e| SignalingError::Malformed {
                        event: EVENT_ICE_CANDIDATE,
                        reason: e.to_string(),
                    })?;
                Ok(SignalMessage::IceCandidate(candidate))
            }
            EVENT_ADMIN_READY => Ok(SignalMessage::AdminReady),
            other => Err(SignalingError::UnknownEvent(other.to_string())),
        }
    }
}

fn parse_description(
    data: Option<Value>,
    event: &'static str,
    expected: SdpType,
) -> Result<SessionDescription, SignalingError> {
    let data = data
        .filter(|v| !v.is_null())
        .ok_or(SignalingError::MissingPayload(event))?;

    let got = data
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SignalingError::Malformed {
            event,
            reason: "missing type".to_string(),
        })?;
    if got != expected.as_str() {
        return Err(SignalingError::WrongType {
            expected: expected.as_str(),
            got: got.to_string(),
        });
    }

    let sdp = data
        .get("sdp")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or(SignalingError::MissingPayload(event))?;

    Ok(SessionDescription {
        sdp_type: expected,
        sdp: sdp.to_string(),
    })
}
