use super::Input;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Periodic work driven by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Timer {
    Heartbeat,
    Liveness,
    Joystick,
    VideoWatchdog,
    /// One-shot wakeup at the next pending-request deadline.
    Requests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TaskSlot {
    Negotiation,
    PeerEvents,
    Timer(Timer),
}

/// Tasks owned by one session generation. Every task is aborted on teardown
/// and when this value is dropped.
#[derive(Default)]
pub(crate) struct SessionTasks {
    handles: HashMap<TaskSlot, JoinHandle<()>>,
}

impl SessionTasks {
    /// Installs a task in its slot, aborting whatever ran there.
    pub(crate) fn replace(&mut self, slot: TaskSlot, handle: JoinHandle<()>) {
        if let Some(old) = self.handles.insert(slot, handle) {
            old.abort();
        }
    }

    pub(crate) fn cancel(&mut self, slot: TaskSlot) {
        if let Some(handle) = self.handles.remove(&slot) {
            handle.abort();
        }
    }

    pub(crate) fn is_running(&self, slot: TaskSlot) -> bool {
        self.handles.get(&slot).is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Emits `Tick` inputs every `period`, starting one period from now.
pub(crate) fn spawn_ticker(
    inputs: mpsc::Sender<Input>,
    generation: u64,
    timer: Timer,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if inputs.send(Input::Tick { generation, timer }).await.is_err() {
                break;
            }
        }
    })
}

/// Emits a single `Tick` at `at`.
pub(crate) fn spawn_deadline(
    inputs: mpsc::Sender<Input>,
    generation: u64,
    timer: Timer,
    at: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(at).await;
        let _ = inputs.send(Input::Tick { generation, timer }).await;
    })
}
