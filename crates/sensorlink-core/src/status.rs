//! Connection status with wait/notify.
//!
//! [`StatusCell`] wraps a `tokio::sync::watch` channel. Every mutation runs
//! under the channel's lock and wakes all waiters, so a waiter never acts on
//! a status that was already replaced.

use tokio::sync::watch;
use tracing::debug;

use sensorlink_types::ConnectionStatus;

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, LinkEvent, LinkId};

/// Snapshot of a link's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub status: ConnectionStatus,
    /// Set by `disconnect()`; the worker exits and waiters are released.
    pub terminated: bool,
    /// Set when the reconnect policy gave up after this many attempts.
    pub exhausted_after: Option<u32>,
}

/// Shared, observable connection status of one link.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<LinkState>,
    link: LinkId,
    events: EventDispatcher,
}

impl StatusCell {
    pub fn new(link: LinkId, events: EventDispatcher) -> Self {
        let (tx, _) = watch::channel(LinkState::default());
        Self { tx, link, events }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.tx.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn is_terminated(&self) -> bool {
        self.tx.borrow().terminated
    }

    /// Apply `next` if it is a legal transition from the current status.
    ///
    /// A terminated link only accepts `Disconnected`. Returns `false` (and
    /// changes nothing) otherwise.
    pub fn transition(&self, next: ConnectionStatus) -> bool {
        let mut from = next;
        let changed = self.tx.send_if_modified(|state| {
            from = state.status;
            let allowed = !state.terminated || next == ConnectionStatus::Disconnected;
            if allowed && state.status.can_transition_to(next) {
                state.status = next;
                true
            } else {
                false
            }
        });
        if changed {
            self.announce(from, next);
        }
        changed
    }

    /// Force `Disconnected` from any live status. Returns whether anything
    /// changed.
    pub fn mark_disconnected(&self) -> bool {
        self.transition(ConnectionStatus::Disconnected)
    }

    /// Stop the link: status drops to `Disconnected` and every waiter wakes,
    /// even if the status was already `Disconnected`.
    pub fn terminate(&self) {
        let mut from = ConnectionStatus::Disconnected;
        self.tx.send_modify(|state| {
            from = state.status;
            state.terminated = true;
            state.status = ConnectionStatus::Disconnected;
        });
        if from != ConnectionStatus::Disconnected {
            self.announce(from, ConnectionStatus::Disconnected);
        }
    }

    /// Terminate because the reconnect policy gave up.
    pub fn exhaust(&self, attempts: u32) {
        self.tx.send_modify(|state| state.exhausted_after = Some(attempts));
        self.terminate();
    }

    /// Clear the terminated flag so the link may run again.
    pub fn revive(&self) {
        self.tx.send_if_modified(|state| {
            let was = state.terminated || state.exhausted_after.is_some();
            state.terminated = false;
            state.exhausted_after = None;
            was
        });
    }

    /// Wait until the link is `Connected`.
    ///
    /// Returns [`Error::Cancelled`] if the link is terminated first, or
    /// [`Error::ReconnectExhausted`] if the worker gave up.
    pub async fn wait_for_connection(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let state = *rx
            .wait_for(|s| s.terminated || s.status.is_connected())
            .await
            .map_err(|_| Error::Cancelled)?;
        match state {
            LinkState {
                exhausted_after: Some(attempts),
                ..
            } => Err(Error::ReconnectExhausted { attempts }),
            LinkState {
                terminated: true, ..
            } => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Wait until the link is `Disconnected` or terminated.
    pub async fn wait_for_disconnection(&self) {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|s| s.terminated || s.status == ConnectionStatus::Disconnected)
            .await;
    }

    fn announce(&self, from: ConnectionStatus, to: ConnectionStatus) {
        debug!(link = %self.link, %from, %to, "Status changed");
        self.events.send(LinkEvent::StatusChanged {
            link: self.link.clone(),
            status: to,
        });
    }
}
