//! FIFO of notification-configuration requests with a single in-flight slot.
//!
//! Host stacks reject a second descriptor write while one is outstanding, so
//! a link hands out the next request only after the previous one completed.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    EnableNotify,
    DisableNotify,
}

impl RequestKind {
    pub fn enables(self) -> bool {
        self == RequestKind::EnableNotify
    }
}

/// One queued configuration operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub kind: RequestKind,
    pub attribute: Uuid,
}

impl PendingRequest {
    pub fn enable(attribute: Uuid) -> Self {
        Self {
            kind: RequestKind::EnableNotify,
            attribute,
        }
    }

    pub fn disable(attribute: Uuid) -> Self {
        Self {
            kind: RequestKind::DisableNotify,
            attribute,
        }
    }
}

/// Ordered request queue.
///
/// `issued() - completed()` is always 0 or 1.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<PendingRequest>,
    in_flight: Option<PendingRequest>,
    issued: u64,
    completed: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: PendingRequest) {
        self.pending.push_back(request);
    }

    /// Move the head of the queue into flight.
    ///
    /// Returns `None` while a request is outstanding or when the queue is empty.
    pub fn issue_next(&mut self) -> Option<PendingRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.in_flight = Some(next);
        self.issued += 1;
        Some(next)
    }

    /// Mark the in-flight request done and return it.
    pub fn complete(&mut self) -> Option<PendingRequest> {
        let done = self.in_flight.take()?;
        self.completed += 1;
        Some(done)
    }

    /// Drop queued requests that were not issued yet.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Drop queued requests for one attribute.
    pub fn remove_attribute(&mut self, attribute: Uuid) {
        self.pending.retain(|r| r.attribute != attribute);
    }

    /// Forget everything, counting an outstanding request as completed.
    pub fn abandon(&mut self) -> Option<PendingRequest> {
        self.pending.clear();
        self.complete()
    }

    pub fn in_flight(&self) -> Option<PendingRequest> {
        self.in_flight
    }

    /// Nothing queued and nothing outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }
}
