//! Capture and recording requests awaiting a vehicle acknowledgement.
//!
//! The wire carries no correlation id, so responses resolve the oldest
//! outstanding request of a matching kind. Expired requests linger for a grace
//! period so a late response is consumed by the request it belongs to.

use rand::RngCore;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const EXPIRED_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Capture,
    RecordingStart,
    RecordingStop,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Capture => "capture",
            RequestKind::RecordingStart => "recording start",
            RequestKind::RecordingStop => "recording stop",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("a {} request is already in progress ({id})", kind.as_str())]
    InProgress { kind: RequestKind, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: String,
    pub kind: RequestKind,
    pub issued_at: Instant,
    pub deadline: Instant,
    pub expired: bool,
}

impl PendingRequest {
    /// Time since the command was sent.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }
}

/// A response matched to its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub request: PendingRequest,
    /// The request had already timed out when the response arrived.
    pub late: bool,
}

#[derive(Debug)]
pub struct PendingRequests {
    prefix: String,
    counter: u64,
    timeout: Duration,
    grace: Duration,
    entries: VecDeque<PendingRequest>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(REQUEST_TIMEOUT, EXPIRED_GRACE)
    }
}

impl PendingRequests {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        let mut prefix = [0u8; 2];
        rand::rng().fill_bytes(&mut prefix);
        Self {
            prefix: hex::encode(prefix),
            counter: 0,
            timeout,
            grace,
            entries: VecDeque::new(),
        }
    }

    /// Registers a new request. Fails while a live request of the same kind
    /// is outstanding.
    pub fn issue(&mut self, kind: RequestKind, now: Instant) -> Result<PendingRequest, RequestError> {
        if let Some(live) = self.entries.iter().find(|r| r.kind == kind && !r.expired) {
            return Err(RequestError::InProgress {
                kind,
                id: live.id.clone(),
            });
        }
        self.counter += 1;
        let request = PendingRequest {
            id: format!("{}-{:x}", self.prefix, self.counter),
            kind,
            issued_at: now,
            deadline: now + self.timeout,
            expired: false,
        };
        self.entries.push_back(request.clone());
        Ok(request)
    }

    /// Resolves the oldest request whose kind is one of `kinds`.
    pub fn resolve(&mut self, kinds: &[RequestKind]) -> Option<Resolved> {
        let pos = self.entries.iter().position(|r| kinds.contains(&r.kind))?;
        let request = self.entries.remove(pos)?;
        Some(Resolved {
            late: request.expired,
            request,
        })
    }

    /// Withdraws a request whose command never reached the vehicle.
    pub fn cancel(&mut self, id: &str) -> Option<PendingRequest> {
        let pos = self.entries.iter().position(|r| r.id == id)?;
        self.entries.remove(pos)
    }

    /// Marks requests past their deadline as expired and returns them. Expired
    /// requests past the grace period are dropped.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest> {
        let grace = self.grace;
        self.entries
            .retain(|r| !(r.expired && now >= r.deadline + grace));

        let mut newly_expired = Vec::new();
        for request in self.entries.iter_mut() {
            if !request.expired && now >= request.deadline {
                request.expired = true;
                newly_expired.push(request.clone());
            }
        }
        newly_expired
    }

    /// Earliest instant at which [`expire`](Self::expire) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .map(|r| if r.expired { r.deadline + self.grace } else { r.deadline })
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every request; used on session teardown.
    pub fn clear(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }
}
