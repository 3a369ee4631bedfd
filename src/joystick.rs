//! Linux joystick device reader.
//!
//! Reads `js_event` records from `/dev/input/jsN` and keeps the latest
//! [`GamepadSnapshot`] in a watch channel. The session samples that snapshot
//! on its own cadence, so the reader never blocks the control loop.

use log::{debug, info, warn};
use skycore::joystick::GamepadSnapshot;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const EVENT_SIZE: usize = 8;
const JS_EVENT_BUTTON: u8 = 0x01;
const JS_EVENT_AXIS: u8 = 0x02;
const JS_EVENT_INIT: u8 = 0x80;
const AXIS_MAX: f64 = 32767.0;

pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsEventKind {
    Button,
    Axis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsEvent {
    pub time_ms: u32,
    pub value: i16,
    pub kind: JsEventKind,
    pub number: u8,
    /// Synthetic event describing the initial device state.
    pub init: bool,
}

impl JsEvent {
    /// Parses one raw record. Unknown event types yield `None`.
    pub fn parse(raw: &[u8; EVENT_SIZE]) -> Option<Self> {
        let time_ms = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let value = i16::from_ne_bytes([raw[4], raw[5]]);
        let kind = match raw[6] & !JS_EVENT_INIT {
            JS_EVENT_BUTTON => JsEventKind::Button,
            JS_EVENT_AXIS => JsEventKind::Axis,
            _ => return None,
        };
        Some(Self {
            time_ms,
            value,
            kind,
            number: raw[7],
            init: raw[6] & JS_EVENT_INIT != 0,
        })
    }
}

/// Applies one event to a snapshot, growing it as new axes and buttons
/// appear.
pub fn apply_event(snapshot: &mut GamepadSnapshot, event: &JsEvent) {
    let index = usize::from(event.number);
    match event.kind {
        JsEventKind::Axis => {
            if snapshot.axes.len() <= index {
                snapshot.axes.resize(index + 1, 0.0);
            }
            snapshot.axes[index] = (f64::from(event.value) / AXIS_MAX).clamp(-1.0, 1.0);
        }
        JsEventKind::Button => {
            if snapshot.buttons.len() <= index {
                snapshot.buttons.resize(index + 1, false);
            }
            snapshot.buttons[index] = event.value != 0;
        }
    }
}

/// Spawns the reader. The device is reopened after [`REOPEN_DELAY`] whenever
/// it is missing or disconnects; the snapshot is cleared meanwhile so a lost
/// device reads as centred sticks.
pub fn spawn_reader(device: PathBuf, snapshot: watch::Sender<GamepadSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reported_missing = false;
        loop {
            match File::open(&device).await {
                Ok(file) => {
                    info!(target: "Joystick", "Opened {}", device.display());
                    reported_missing = false;
                    if let Err(e) = read_events(file, &snapshot).await {
                        warn!(target: "Joystick", "Lost {}: {e}", device.display());
                    }
                    snapshot.send_replace(GamepadSnapshot::default());
                }
                Err(e) => {
                    if !reported_missing {
                        warn!(target: "Joystick", "Cannot open {}: {e}", device.display());
                        reported_missing = true;
                    }
                }
            }
            if snapshot.is_closed() {
                debug!(target: "Joystick", "No readers left, stopping");
                return;
            }
            tokio::time::sleep(REOPEN_DELAY).await;
        }
    })
}

async fn read_events(
    mut file: File,
    snapshot: &watch::Sender<GamepadSnapshot>,
) -> std::io::Result<()> {
    let mut raw = [0u8; EVENT_SIZE];
    loop {
        file.read_exact(&mut raw).await?;
        if let Some(event) = JsEvent::parse(&raw) {
            snapshot.send_modify(|s| apply_event(s, &event));
        }
    }
}
