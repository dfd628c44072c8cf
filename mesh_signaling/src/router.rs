//! Signaling state machine
//!
//! The router turns inbound events into registry updates and outbound
//! events. It keeps no state of its own beyond the registry it guards and the
//! switchboard it sends through.
//!
//! Every outbound event caused by a registry change is delivered while the
//! registry lock is held, so all participants see joins and departures in
//! the same order the registry applied them.

use crate::channel::{Channel, Switchboard};
use crate::error::RegistryError;
use crate::protocol::{InboundEvent, OutboundEvent, ParticipantId, Payload, RoomId};
use crate::registry::{ParticipantPhase, RoomRegistry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Router behaviour that is not fixed by the protocol
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Reject joins beyond this many members
    pub max_room_size: Option<usize>,
    /// Tell remaining members when someone disconnects
    pub announce_departures: bool,
}

pub struct SignalingRouter<C> {
    registry: Mutex<RoomRegistry>,
    switchboard: Switchboard<C>,
    announce_departures: bool,
}

impl<C: Channel> SignalingRouter<C> {
    pub fn new(options: RouterOptions) -> Self {
        Self {
            registry: Mutex::new(RoomRegistry::with_max_room_size(options.max_room_size)),
            switchboard: Switchboard::new(),
            announce_departures: options.announce_departures,
        }
    }

    /// Rebuild a router from a saved registry and its participants' channels
    ///
    /// Channels for participants the registry does not list as connected are
    /// dropped.
    pub fn restore(
        mut registry: RoomRegistry,
        channels: impl IntoIterator<Item = (ParticipantId, Arc<C>)>,
        options: RouterOptions,
    ) -> Self {
        registry.set_max_room_size(options.max_room_size);
        let switchboard = Switchboard::new();
        for (participant, channel) in channels {
            if registry.is_connected(participant) {
                switchboard.attach(participant, channel);
            } else {
                debug!(participant = %participant, "Skipping channel of departed participant");
            }
        }
        Self {
            registry: Mutex::new(registry),
            switchboard,
            announce_departures: options.announce_departures,
        }
    }

    /// Copy of the registry, for saving
    pub fn registry_snapshot(&self) -> RoomRegistry {
        self.registry().clone()
    }

    /// Every connected participant's channel
    pub fn channels(&self) -> Vec<(ParticipantId, Arc<C>)> {
        self.switchboard.entries()
    }

    /// A participant's channel opened
    pub fn connect(&self, participant: ParticipantId, channel: Arc<C>) {
        let mut registry = self.registry();
        if !registry.connect(participant) {
            warn!(participant = %participant, "Participant connected twice, keeping first channel");
            return;
        }
        self.switchboard.attach(participant, channel);
        self.send(participant, OutboundEvent::IdAssigned { id: participant });
        info!(participant = %participant, "Participant connected");
    }

    /// Process one event received on `participant`'s channel
    pub fn handle(&self, participant: ParticipantId, event: InboundEvent) {
        match event {
            InboundEvent::Join { room } => self.join(participant, room),
            InboundEvent::HandshakeOffer { target, payload } => {
                self.relay(participant, target, payload, |from, payload| {
                    OutboundEvent::IncomingHandshakeOffer { from, payload }
                })
            }
            InboundEvent::HandshakeAnswer { target, payload } => {
                self.relay(participant, target, payload, |from, payload| {
                    OutboundEvent::IncomingHandshakeAnswer { from, payload }
                })
            }
            InboundEvent::KeepAlive => {}
        }
    }

    /// A participant's channel closed. Safe to call more than once.
    pub fn disconnect(&self, participant: ParticipantId) {
        let mut registry = self.registry();
        if !registry.is_connected(participant) {
            debug!(participant = %participant, "Disconnect for unknown participant");
            return;
        }
        let room = registry.disconnect(participant);
        self.switchboard.detach(participant);

        if let Some(room) = &room {
            if self.announce_departures {
                for member in registry.members(room) {
                    self.send(member, OutboundEvent::ParticipantLeft { id: participant });
                }
            }
        }
        self.check(&registry);
        info!(participant = %participant, room = ?room, "Participant disconnected");
    }

    pub fn members(&self, room: &RoomId) -> Vec<ParticipantId> {
        self.registry().members(room)
    }

    pub fn room_of(&self, participant: ParticipantId) -> Option<RoomId> {
        self.registry().room_of(participant)
    }

    pub fn phase(&self, participant: ParticipantId) -> ParticipantPhase {
        self.registry().phase(participant)
    }

    pub fn channel(&self, participant: ParticipantId) -> Option<Arc<C>> {
        self.switchboard.get(participant)
    }

    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        self.registry().check_invariants()
    }

    fn join(&self, participant: ParticipantId, room: RoomId) {
        let mut registry = self.registry();
        let outcome = match registry.join(&room, participant) {
            Ok(outcome) => outcome,
            Err(RegistryError::RoomFull { room, capacity }) => {
                info!(participant = %participant, room = %room, capacity, "Room full, join rejected");
                self.send(participant, OutboundEvent::RoomFull { room });
                return;
            }
            Err(err) => {
                debug!(participant = %participant, room = %room, "Join dropped: {err}");
                return;
            }
        };

        if let Some(previous) = &outcome.left_room {
            info!(participant = %participant, from = %previous, to = %room, "Participant switched rooms");
            if self.announce_departures {
                for member in registry.members(previous) {
                    self.send(member, OutboundEvent::ParticipantLeft { id: participant });
                }
            }
        }

        if outcome.newly_joined {
            for member in &outcome.prior_members {
                self.send(*member, OutboundEvent::ParticipantJoined { id: participant });
            }
            info!(
                participant = %participant,
                room = %room,
                existing = outcome.prior_members.len(),
                "Participant joined room"
            );
        } else {
            debug!(participant = %participant, room = %room, "Repeated join");
        }

        self.send(
            participant,
            OutboundEvent::ExistingMembers {
                ids: outcome.prior_members,
            },
        );
        self.check(&registry);
    }

    fn relay(
        &self,
        sender: ParticipantId,
        target: ParticipantId,
        payload: Payload,
        envelope: impl FnOnce(ParticipantId, Payload) -> OutboundEvent,
    ) {
        let registry = self.registry();
        let Some(room) = registry.room_of(sender) else {
            debug!(sender = %sender, target = %target, "Relay from participant outside any room dropped");
            return;
        };
        if registry.room_of(target).as_ref() != Some(&room) {
            debug!(sender = %sender, target = %target, room = %room, "Relay to participant outside room dropped");
            return;
        }
        self.send(target, envelope(sender, payload));
    }

    fn send(&self, participant: ParticipantId, event: OutboundEvent) {
        if let Err(err) = self.switchboard.send(participant, event) {
            warn!(participant = %participant, "Dropping outbound event: {err}");
        }
    }

    fn check(&self, registry: &RoomRegistry) {
        if cfg!(debug_assertions) {
            let result = registry.check_invariants();
            if let Err(err) = &result {
                error!("{err}");
            }
            debug_assert!(result.is_ok(), "registry invariant violated");
        }
    }

    fn registry(&self) -> MutexGuard<'_, RoomRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Mailbox;

    struct Harness {
        router: SignalingRouter<Mailbox>,
    }

    impl Harness {
        fn new(options: RouterOptions) -> Self {
            Self {
                router: SignalingRouter::new(options),
            }
        }

        fn connect(&self) -> ParticipantId {
            let id = ParticipantId::random();
            self.router.connect(id, Arc::new(Mailbox::new(id)));
            assert_eq!(self.drain(id), vec![OutboundEvent::IdAssigned { id }]);
            id
        }

        fn drain(&self, id: ParticipantId) -> Vec<OutboundEvent> {
            self.router.channel(id).map(|c| c.drain()).unwrap_or_default()
        }

        fn join(&self, id: ParticipantId, room: &str) {
            self.router.handle(id, InboundEvent::Join { room: RoomId::new(room) });
        }
    }

    #[test]
    fn join_notifies_both_sides() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());

        h.join(a, "R1");
        assert_eq!(h.drain(a), vec![OutboundEvent::ExistingMembers { ids: vec![] }]);

        h.join(b, "R1");
        assert_eq!(h.drain(b), vec![OutboundEvent::ExistingMembers { ids: vec![a] }]);
        assert_eq!(h.drain(a), vec![OutboundEvent::ParticipantJoined { id: b }]);
    }

    #[test]
    fn repeated_join_does_not_renotify() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.join(b, "R1");
        h.drain(a);
        h.drain(b);

        h.join(b, "R1");
        assert_eq!(h.drain(b), vec![OutboundEvent::ExistingMembers { ids: vec![a] }]);
        assert!(h.drain(a).is_empty());
        assert_eq!(h.router.members(&RoomId::new("R1")), vec![a, b]);
    }

    #[test]
    fn answer_is_relayed_with_sender() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.join(b, "R1");
        h.drain(a);

        h.router.handle(
            b,
            InboundEvent::HandshakeAnswer {
                target: a,
                payload: Payload::from("sdp-answer"),
            },
        );
        assert_eq!(
            h.drain(a),
            vec![OutboundEvent::IncomingHandshakeAnswer {
                from: b,
                payload: Payload::from("sdp-answer"),
            }]
        );
    }

    #[test]
    fn relay_across_rooms_is_dropped() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.join(b, "R2");
        h.drain(b);

        h.router.handle(
            a,
            InboundEvent::HandshakeOffer {
                target: b,
                payload: Payload::from("sdp"),
            },
        );
        assert!(h.drain(b).is_empty());
    }

    #[test]
    fn relay_from_unjoined_sender_is_dropped() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(b, "R1");
        h.drain(b);

        h.router.handle(
            a,
            InboundEvent::HandshakeOffer {
                target: b,
                payload: Payload::from("sdp"),
            },
        );
        assert!(h.drain(b).is_empty());
    }

    #[test]
    fn full_room_sends_room_full() {
        let h = Harness::new(RouterOptions {
            max_room_size: Some(1),
            ..RouterOptions::default()
        });
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.drain(a);

        h.join(b, "R1");
        assert_eq!(
            h.drain(b),
            vec![OutboundEvent::RoomFull { room: RoomId::new("R1") }]
        );
        assert!(h.drain(a).is_empty());
        assert_eq!(h.router.phase(b), ParticipantPhase::Unjoined);
    }

    #[test]
    fn departures_are_announced_when_enabled() {
        let h = Harness::new(RouterOptions {
            announce_departures: true,
            ..RouterOptions::default()
        });
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.join(b, "R1");
        h.drain(a);

        h.router.disconnect(b);
        assert_eq!(h.drain(a), vec![OutboundEvent::ParticipantLeft { id: b }]);
    }

    #[test]
    fn departures_are_silent_by_default() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.join(b, "R1");
        h.drain(a);

        h.router.disconnect(b);
        assert!(h.drain(a).is_empty());
        assert_eq!(h.router.phase(b), ParticipantPhase::Departed);
    }

    #[test]
    fn cross_room_join_leaves_previous_room() {
        let h = Harness::new(RouterOptions {
            announce_departures: true,
            ..RouterOptions::default()
        });
        let (a, b, c) = (h.connect(), h.connect(), h.connect());
        h.join(a, "R1");
        h.join(b, "R1");
        h.join(c, "R2");
        h.drain(a);
        h.drain(c);

        h.join(b, "R2");
        assert_eq!(h.drain(a), vec![OutboundEvent::ParticipantLeft { id: b }]);
        assert_eq!(h.drain(c), vec![OutboundEvent::ParticipantJoined { id: b }]);
        assert_eq!(h.router.members(&RoomId::new("R1")), vec![a]);
        assert_eq!(h.router.members(&RoomId::new("R2")), vec![c, b]);
        h.router.check_invariants().unwrap();
    }

    #[test]
    fn disconnect_is_idempotent() {
        let h = Harness::new(RouterOptions::default());
        let a = h.connect();
        h.join(a, "R1");

        h.router.disconnect(a);
        h.router.disconnect(a);
        assert!(h.router.members(&RoomId::new("R1")).is_empty());
        assert!(h.router.channel(a).is_none());
    }

    #[test]
    fn restored_router_continues_where_saved_one_stopped() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");
        h.drain(a);

        let restored = SignalingRouter::restore(
            h.router.registry_snapshot(),
            h.router
                .channels()
                .into_iter()
                .map(|(id, mailbox)| (id, Arc::new(Mailbox::with_events(id, mailbox.pending())))),
            RouterOptions::default(),
        );
        restored.handle(b, InboundEvent::Join { room: RoomId::new("R1") });

        let drain = |id| restored.channel(id).map(|c| c.drain()).unwrap_or_default();
        assert_eq!(drain(a), vec![OutboundEvent::ParticipantJoined { id: b }]);
        assert_eq!(drain(b), vec![OutboundEvent::ExistingMembers { ids: vec![a] }]);
        restored.check_invariants().unwrap();
    }

    #[test]
    fn restore_applies_configured_capacity() {
        let h = Harness::new(RouterOptions::default());
        let (a, b) = (h.connect(), h.connect());
        h.join(a, "R1");

        let restored = SignalingRouter::restore(
            h.router.registry_snapshot(),
            h.router.channels(),
            RouterOptions {
                max_room_size: Some(1),
                ..RouterOptions::default()
            },
        );
        restored.handle(b, InboundEvent::Join { room: RoomId::new("R1") });
        assert_eq!(restored.phase(b), ParticipantPhase::Unjoined);
    }
}
