pub mod elevation;
pub mod joystick;
pub mod liveness;
pub mod mission;
pub mod net;
pub mod peer;
pub mod position;
pub mod protocol;
pub mod requests;
pub mod signaling;
pub mod state;
pub mod tracks;
