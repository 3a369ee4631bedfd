pub use skycore;

pub mod types {
    pub mod events;
}

pub mod config;
pub mod console;
pub mod elevation;
pub mod error;
pub mod joystick;
pub mod peer;
pub mod session;
pub mod signaling;

pub use console::{Console, ConsoleDeps, ConsoleHandle};
pub use error::SessionError;
pub use session::ControlMode;
