//! Connection state machine owned by the session actor.

use serde::Serialize;

/// Current state of the console's link to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No peer session; waiting for an offer.
    #[default]
    Idle,
    /// Offer accepted, answer sent, waiting for the data channel.
    Negotiating,
    /// Data channel open and liveness satisfied.
    Connected,
    /// Connected, but no liveness signal within the stale threshold.
    Degraded,
    /// The session failed and is being torn down.
    Failed,
    /// The console shut down.
    Closed,
}

impl ConnectionState {
    /// Connected or Degraded: a data channel is usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTransition {
    /// A well-formed offer was accepted; any previous session is gone.
    OfferAccepted,
    DataChannelOpened,
    SignalStale,
    SignalRestored,
    /// Transport error or remote close.
    SessionFailed,
    /// Teardown of a failed session finished.
    Reset,
    Shutdown,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid transition {attempted:?} in state {current}")]
pub struct InvalidTransition {
    pub current: ConnectionState,
    pub attempted: ConnectionTransition,
}

/// Applies `transition` to `state`, returning the new state.
pub fn apply_transition(
    state: ConnectionState,
    transition: ConnectionTransition,
) -> Result<ConnectionState, InvalidTransition> {
    use ConnectionState as S;
    use ConnectionTransition as T;

    let next = match (state, &transition) {
        (S::Closed, _) => {
            return Err(InvalidTransition {
                current: state,
                attempted: transition,
            });
        }
        (_, T::Shutdown) => S::Closed,
        (S::Idle | S::Negotiating | S::Connected | S::Degraded | S::Failed, T::OfferAccepted) => {
            S::Negotiating
        }
        (S::Negotiating, T::DataChannelOpened) => S::Connected,
        (S::Connected, T::SignalStale) => S::Degraded,
        (S::Degraded, T::SignalRestored) => S::Connected,
        (S::Negotiating | S::Connected | S::Degraded, T::SessionFailed) => S::Failed,
        (S::Failed, T::Reset) => S::Idle,
        _ => {
            return Err(InvalidTransition {
                current: state,
                attempted: transition,
            });
        }
    };
    Ok(next)
}
