//! Pure state machine behind [`AttributeLink`](crate::attribute::AttributeLink).
//!
//! Every handler takes the current state plus one input (a user call or a
//! host-stack callback) and returns the [`Action`]s to perform. Nothing here
//! touches a radio or awaits, so the whole lifecycle is testable by feeding
//! events by hand.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use sensorlink_types::{AttributeValue, ConnectionStatus, DescriptorRegistry, codec};

use crate::backend::{AttributeHandle, DiscoveredAttribute};
use crate::queue::{PendingRequest, RequestQueue};

/// Where the link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Opening,
    Discovering,
    Subscribing,
    Ready,
    Closing,
}

/// Output of a handler.
///
/// The first four variants are host-stack commands, the rest are
/// notifications for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Open { address: String, reuse: bool },
    Discover,
    Issue {
        request: PendingRequest,
        handle: AttributeHandle,
    },
    Release,
    Completed {
        request: PendingRequest,
        success: bool,
    },
    Ready { subscribed: usize },
    Malformed { attribute: Uuid, len: usize },
    /// The connection dropped (or never came up) without being asked to.
    Lost { address: String, was_connected: bool },
}

impl Action {
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Action::Open { .. } | Action::Discover | Action::Issue { .. } | Action::Release
        )
    }
}

#[derive(Debug)]
struct Registration {
    value: watch::Sender<Option<AttributeValue>>,
}

/// Attribute link state.
#[derive(Debug)]
pub struct AttributeMachine {
    registry: Arc<DescriptorRegistry>,
    phase: Phase,
    status: ConnectionStatus,
    address: Option<String>,
    /// Registration order decides subscription order.
    order: Vec<Uuid>,
    registrations: HashMap<Uuid, Registration>,
    /// Handles from the last discovery; cleared on release or loss.
    handles: HashMap<Uuid, AttributeHandle>,
    queue: RequestQueue,
    subscribed: usize,
}

impl AttributeMachine {
    pub fn new(registry: Arc<DescriptorRegistry>) -> Self {
        Self {
            registry,
            phase: Phase::Idle,
            status: ConnectionStatus::Disconnected,
            address: None,
            order: Vec::new(),
            registrations: HashMap::new(),
            handles: HashMap::new(),
            queue: RequestQueue::new(),
            subscribed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn is_registered(&self, attribute: &Uuid) -> bool {
        self.registrations.contains_key(attribute)
    }

    pub fn handle(&self, attribute: &Uuid) -> Option<AttributeHandle> {
        self.handles.get(attribute).copied()
    }

    // --- user calls -------------------------------------------------------

    /// Start connecting to `address`.
    ///
    /// A no-op while the link is already live; disconnect first to switch
    /// peers.
    pub fn connect(&mut self, address: &str) -> Vec<Action> {
        if self.phase != Phase::Idle {
            debug!(address, phase = ?self.phase, "Connect ignored, link is busy");
            return Vec::new();
        }
        // The backend decides whether the old connection object is still live.
        let reuse = self.address.as_deref() == Some(address);
        self.address = Some(address.to_string());
        self.phase = Phase::Opening;
        self.status = ConnectionStatus::Connecting;
        vec![Action::Open {
            address: address.to_string(),
            reuse,
        }]
    }

    /// Begin teardown: disable every subscribed attribute one at a time,
    /// then release. Idempotent.
    pub fn disconnect(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::Idle | Phase::Closing => Vec::new(),
            Phase::Opening | Phase::Discovering => self.finish_release(),
            Phase::Subscribing | Phase::Ready => {
                self.phase = Phase::Closing;
                self.queue.clear_pending();
                for id in &self.order {
                    if self.handles.contains_key(id) {
                        self.queue.push(PendingRequest::disable(*id));
                    }
                }
                self.issue_next()
            }
        }
    }

    /// Release immediately, abandoning whatever is outstanding.
    pub fn force_release(&mut self) -> Vec<Action> {
        if self.phase == Phase::Idle {
            return Vec::new();
        }
        if let Some(request) = self.queue.abandon() {
            warn!(attribute = %request.attribute, kind = ?request.kind, "Abandoning request");
        }
        self.finish_release()
    }

    /// Start tracking `attribute`. Returns the value receiver and, when the
    /// link is ready, the actions that subscribe it.
    pub fn register(&mut self, attribute: Uuid) -> (watch::Receiver<Option<AttributeValue>>, Vec<Action>) {
        if let Some(existing) = self.registrations.get(&attribute) {
            return (existing.value.subscribe(), Vec::new());
        }
        let (tx, rx) = watch::channel(None);
        self.registrations.insert(attribute, Registration { value: tx });
        self.order.push(attribute);

        let mut actions = Vec::new();
        if matches!(self.phase, Phase::Subscribing | Phase::Ready)
            && self.handles.contains_key(&attribute)
        {
            self.queue.push(PendingRequest::enable(attribute));
            self.phase = Phase::Subscribing;
            actions = self.issue_next();
        }
        (rx, actions)
    }

    /// Stop tracking `attribute`, disabling its notifications if subscribed.
    pub fn unregister(&mut self, attribute: &Uuid) -> Vec<Action> {
        if self.registrations.remove(attribute).is_none() {
            return Vec::new();
        }
        self.order.retain(|id| id != attribute);
        self.queue.remove_attribute(*attribute);

        if matches!(self.phase, Phase::Subscribing | Phase::Ready)
            && self.handles.contains_key(attribute)
        {
            self.queue.push(PendingRequest::disable(*attribute));
            self.phase = Phase::Subscribing;
            return self.issue_next();
        }
        Vec::new()
    }

    // --- host-stack callbacks ---------------------------------------------

    pub fn on_connected(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::Opening => {
                self.phase = Phase::Discovering;
                self.status = ConnectionStatus::Connected;
                vec![Action::Discover]
            }
            Phase::Idle => {
                // Open finished after the user gave up on it.
                debug!("Late connection after teardown, releasing");
                vec![Action::Release]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_discovered(&mut self, attributes: &[DiscoveredAttribute]) -> Vec<Action> {
        if self.phase != Phase::Discovering {
            return Vec::new();
        }
        self.handles = attributes.iter().map(|a| (a.id, a.handle)).collect();
        self.subscribed = 0;

        for id in &self.order {
            if self.handles.contains_key(id) {
                self.queue.push(PendingRequest::enable(*id));
            } else {
                warn!(attribute = %id, "Registered attribute not offered by peer");
            }
        }
        self.phase = Phase::Subscribing;
        self.issue_next()
    }

    /// The only place a queued request after the first gets issued.
    ///
    /// A completion that does not belong to the request in flight is stale
    /// (left over from an earlier connection) and leaves the slot occupied.
    pub fn on_operation_complete(&mut self, attribute: Uuid, success: bool) -> Vec<Action> {
        match self.queue.in_flight() {
            Some(request) if request.attribute == attribute => {}
            Some(request) => {
                warn!(expected = %request.attribute, got = %attribute, "Ignoring completion for a request not in flight");
                return Vec::new();
            }
            None => {
                debug!(%attribute, "Completion with nothing in flight");
                return Vec::new();
            }
        }
        let Some(request) = self.queue.complete() else {
            return Vec::new();
        };
        if success {
            if request.kind.enables() {
                self.subscribed += 1;
            } else {
                self.subscribed = self.subscribed.saturating_sub(1);
            }
        } else {
            warn!(attribute = %request.attribute, kind = ?request.kind, "Configuration request failed");
        }

        let mut actions = vec![Action::Completed { request, success }];
        actions.extend(self.issue_next());
        actions
    }

    /// Decode and store a notified value. Values for unknown attributes are
    /// dropped.
    pub fn on_value(&mut self, attribute: Uuid, raw: &Bytes) -> Vec<Action> {
        let Some(registration) = self.registrations.get(&attribute) else {
            return Vec::new();
        };
        let descriptor = self.registry.get(&attribute);
        let mut actions = Vec::new();
        if !codec::is_well_formed(descriptor, raw) {
            actions.push(Action::Malformed {
                attribute,
                len: raw.len(),
            });
        }
        registration
            .value
            .send_replace(Some(codec::decode(descriptor, raw)));
        actions
    }

    /// The low-level connection dropped (or never came up).
    pub fn on_disconnected(&mut self) -> Vec<Action> {
        let was = self.phase;
        if let Some(request) = self.queue.abandon() {
            debug!(attribute = %request.attribute, "In-flight request lost with connection");
        }
        self.reset();
        match (was, self.address.clone()) {
            (Phase::Idle, _) | (_, None) => Vec::new(),
            // Let the backend drop whatever is left of the connection object.
            (Phase::Closing, _) => vec![Action::Release],
            (_, Some(address)) => vec![Action::Lost {
                address,
                was_connected: was != Phase::Opening,
            }],
        }
    }

    fn issue_next(&mut self) -> Vec<Action> {
        while let Some(request) = self.queue.issue_next() {
            match self.handles.get(&request.attribute) {
                Some(&handle) => return vec![Action::Issue { request, handle }],
                None => {
                    self.queue.complete();
                }
            }
        }
        if self.queue.in_flight().is_some() {
            return Vec::new();
        }
        match self.phase {
            Phase::Subscribing => {
                self.phase = Phase::Ready;
                vec![Action::Ready {
                    subscribed: self.subscribed,
                }]
            }
            Phase::Closing => self.finish_release(),
            _ => Vec::new(),
        }
    }

    fn finish_release(&mut self) -> Vec<Action> {
        self.reset();
        vec![Action::Release]
    }

    /// Back to `Idle`. Registrations survive; handles and values do not.
    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.status = ConnectionStatus::Disconnected;
        self.handles.clear();
        self.queue.clear_pending();
        self.subscribed = 0;
        for registration in self.registrations.values() {
            registration.value.send_replace(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RequestKind;
    use sensorlink_types::uuids::{BATTERY_LEVEL, HUMIDITY, TEMPERATURE};

    fn machine() -> AttributeMachine {
        AttributeMachine::new(Arc::new(DescriptorRegistry::standard()))
    }

    fn discovered() -> Vec<DiscoveredAttribute> {
        vec![
            DiscoveredAttribute {
                id: BATTERY_LEVEL,
                handle: AttributeHandle(1),
            },
            DiscoveredAttribute {
                id: TEMPERATURE,
                handle: AttributeHandle(2),
            },
        ]
    }

    fn issued(actions: &[Action]) -> Vec<(RequestKind, Uuid)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Issue { request, .. } => Some((request.kind, request.attribute)),
                _ => None,
            })
            .collect()
    }

    /// Drive to Ready with both attributes subscribed.
    fn ready_machine() -> AttributeMachine {
        let mut m = machine();
        let _ = m.register(BATTERY_LEVEL);
        let _ = m.register(TEMPERATURE);
        m.connect("AA:BB");
        m.on_connected();
        m.on_discovered(&discovered());
        m.on_operation_complete(BATTERY_LEVEL, true);
        m.on_operation_complete(TEMPERATURE, true);
        assert!(m.is_ready());
        m
    }

    #[test]
    fn test_connect_opens_and_sets_connecting() {
        let mut m = machine();
        let actions = m.connect("AA:BB");
        assert_eq!(
            actions,
            vec![Action::Open {
                address: "AA:BB".into(),
                reuse: false
            }]
        );
        assert_eq!(m.status(), ConnectionStatus::Connecting);
        assert_eq!(m.address(), Some("AA:BB"));
        assert!(m.connect("AA:BB").is_empty());
    }

    #[test]
    fn test_subscriptions_issue_one_at_a_time() {
        let mut m = machine();
        let _ = m.register(BATTERY_LEVEL);
        let _ = m.register(TEMPERATURE);
        m.connect("AA:BB");
        assert_eq!(m.on_connected(), vec![Action::Discover]);
        assert_eq!(m.status(), ConnectionStatus::Connected);

        let first = m.on_discovered(&discovered());
        assert_eq!(issued(&first), vec![(RequestKind::EnableNotify, BATTERY_LEVEL)]);
        assert_eq!(m.queue().issued() - m.queue().completed(), 1);

        let second = m.on_operation_complete(BATTERY_LEVEL, true);
        assert_eq!(issued(&second), vec![(RequestKind::EnableNotify, TEMPERATURE)]);

        let done = m.on_operation_complete(TEMPERATURE, true);
        assert!(done.contains(&Action::Ready { subscribed: 2 }));
        assert!(m.is_ready());
        assert_eq!(m.queue().issued(), m.queue().completed());
    }

    #[test]
    fn test_completion_for_other_attribute_keeps_slot() {
        let mut m = machine();
        let _ = m.register(BATTERY_LEVEL);
        let _ = m.register(TEMPERATURE);
        m.connect("AA:BB");
        m.on_connected();
        m.on_discovered(&discovered());
        assert_eq!(
            m.queue().in_flight(),
            Some(PendingRequest::enable(BATTERY_LEVEL))
        );

        assert!(m.on_operation_complete(HUMIDITY, true).is_empty());
        assert!(m.on_operation_complete(TEMPERATURE, true).is_empty());
        assert_eq!(
            m.queue().in_flight(),
            Some(PendingRequest::enable(BATTERY_LEVEL))
        );
        assert_eq!(m.queue().completed(), 0);

        let next = m.on_operation_complete(BATTERY_LEVEL, true);
        assert_eq!(issued(&next), vec![(RequestKind::EnableNotify, TEMPERATURE)]);
    }

    #[test]
    fn test_missing_attribute_is_skipped() {
        let mut m = machine();
        let _ = m.register(HUMIDITY);
        let _ = m.register(BATTERY_LEVEL);
        m.connect("AA:BB");
        m.on_connected();
        let actions = m.on_discovered(&discovered());
        assert_eq!(issued(&actions), vec![(RequestKind::EnableNotify, BATTERY_LEVEL)]);
        assert_eq!(m.handle(&HUMIDITY), None);
    }

    #[test]
    fn test_no_registrations_goes_straight_to_ready() {
        let mut m = machine();
        m.connect("AA:BB");
        m.on_connected();
        let actions = m.on_discovered(&discovered());
        assert_eq!(actions, vec![Action::Ready { subscribed: 0 }]);
    }

    #[test]
    fn test_disconnect_disables_then_releases() {
        let mut m = ready_machine();
        let first = m.disconnect();
        assert_eq!(issued(&first), vec![(RequestKind::DisableNotify, BATTERY_LEVEL)]);
        assert_eq!(m.phase(), Phase::Closing);
        assert!(m.disconnect().is_empty());

        let second = m.on_operation_complete(BATTERY_LEVEL, true);
        assert_eq!(issued(&second), vec![(RequestKind::DisableNotify, TEMPERATURE)]);

        let last = m.on_operation_complete(TEMPERATURE, true);
        assert!(last.contains(&Action::Release));
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        assert_eq!(m.queue().issued(), m.queue().completed());
        assert!(m.is_registered(&BATTERY_LEVEL));
    }

    #[test]
    fn test_disconnect_while_idle_is_noop() {
        let mut m = machine();
        assert!(m.disconnect().is_empty());
        assert!(m.force_release().is_empty());
    }

    #[test]
    fn test_disconnect_while_opening_releases() {
        let mut m = machine();
        m.connect("AA:BB");
        assert_eq!(m.disconnect(), vec![Action::Release]);
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        // The open completing afterwards is released again.
        assert_eq!(m.on_connected(), vec![Action::Release]);
    }

    #[test]
    fn test_force_release_abandons_in_flight() {
        let mut m = ready_machine();
        m.disconnect();
        assert_eq!(m.queue().issued() - m.queue().completed(), 1);
        assert_eq!(m.force_release(), vec![Action::Release]);
        assert_eq!(m.queue().issued(), m.queue().completed());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_unexpected_loss_reports_lost_and_resets() {
        let mut m = ready_machine();
        let (rx, _) = m.register(BATTERY_LEVEL);
        m.on_value(BATTERY_LEVEL, &Bytes::from_static(&[0x32]));
        assert_eq!(*rx.borrow(), Some(AttributeValue::Integer(50)));

        let actions = m.on_disconnected();
        assert_eq!(
            actions,
            vec![Action::Lost {
                address: "AA:BB".into(),
                was_connected: true
            }]
        );
        assert_eq!(*rx.borrow(), None);
        assert_eq!(m.handle(&BATTERY_LEVEL), None);
        assert!(m.is_registered(&BATTERY_LEVEL));
    }

    #[test]
    fn test_loss_during_closing_is_not_reported() {
        let mut m = ready_machine();
        m.disconnect();
        assert_eq!(m.on_disconnected(), vec![Action::Release]);
        assert_eq!(m.queue().issued(), m.queue().completed());
    }

    #[test]
    fn test_reconnect_to_same_address_requests_reuse() {
        let mut m = ready_machine();
        m.force_release();
        assert_eq!(
            m.connect("AA:BB"),
            vec![Action::Open {
                address: "AA:BB".into(),
                reuse: true
            }]
        );
        m.disconnect();
        assert_eq!(
            m.connect("CC:DD"),
            vec![Action::Open {
                address: "CC:DD".into(),
                reuse: false
            }]
        );
    }

    #[test]
    fn test_register_while_ready_subscribes() {
        let mut m = ready_machine();
        // Humidity is not discovered, so nothing to issue.
        let (_, none) = m.register(HUMIDITY);
        assert!(none.is_empty());
        assert!(m.is_ready());

        let actions = m.unregister(&TEMPERATURE);
        assert_eq!(issued(&actions), vec![(RequestKind::DisableNotify, TEMPERATURE)]);
        assert!(!m.is_ready());
        let done = m.on_operation_complete(TEMPERATURE, true);
        assert!(done.iter().any(|a| matches!(a, Action::Ready { .. })));

        let (_, again) = m.register(TEMPERATURE);
        assert_eq!(issued(&again), vec![(RequestKind::EnableNotify, TEMPERATURE)]);
    }

    #[test]
    fn test_register_twice_shares_value() {
        let mut m = machine();
        let (a, _) = m.register(BATTERY_LEVEL);
        let (b, _) = m.register(BATTERY_LEVEL);
        m.on_value(BATTERY_LEVEL, &Bytes::from_static(&[0x10]));
        assert_eq!(*a.borrow(), *b.borrow());
    }

    #[test]
    fn test_malformed_value_is_flagged_but_stored() {
        let mut m = ready_machine();
        let (rx, _) = m.register(TEMPERATURE);
        let actions = m.on_value(TEMPERATURE, &Bytes::from_static(&[0x01]));
        assert_eq!(
            actions,
            vec![Action::Malformed {
                attribute: TEMPERATURE,
                len: 1
            }]
        );
        assert!(rx.borrow().is_some());
    }

    #[test]
    fn test_failed_completion_still_advances() {
        let mut m = machine();
        let _ = m.register(BATTERY_LEVEL);
        let _ = m.register(TEMPERATURE);
        m.connect("AA:BB");
        m.on_connected();
        m.on_discovered(&discovered());
        let actions = m.on_operation_complete(BATTERY_LEVEL, false);
        assert!(actions.contains(&Action::Completed {
            request: PendingRequest::enable(BATTERY_LEVEL),
            success: false
        }));
        assert_eq!(issued(&actions), vec![(RequestKind::EnableNotify, TEMPERATURE)]);
    }

    #[test]
    fn test_failed_open_is_lost_without_connection() {
        let mut m = machine();
        m.connect("AA:BB");
        assert_eq!(
            m.on_disconnected(),
            vec![Action::Lost {
                address: "AA:BB".into(),
                was_connected: false
            }]
        );
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_command_classification() {
        assert!(Action::Discover.is_command());
        assert!(!Action::Ready { subscribed: 0 }.is_command());
    }
}
