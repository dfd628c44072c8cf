//! Participant-side handshake driver
//!
//! Which side of a link proposes is never stored: it follows from the event
//! that triggered the handshake. A member told about a newcomer
//! (`participant-joined`) makes the offer; the newcomer, having received
//! `existing-members`, waits and answers.

use crate::protocol::{InboundEvent, OutboundEvent, ParticipantId, Payload};

/// Side of a two-phase handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

impl HandshakeRole {
    /// Role the recipient of `event` takes toward the peer(s) it names
    pub fn for_event(event: &OutboundEvent) -> Option<Self> {
        match event {
            OutboundEvent::ParticipantJoined { .. } => Some(Self::Initiator),
            OutboundEvent::ExistingMembers { .. }
            | OutboundEvent::IncomingHandshakeOffer { .. } => Some(Self::Responder),
            OutboundEvent::IncomingHandshakeAnswer { .. } => Some(Self::Initiator),
            OutboundEvent::IdAssigned { .. }
            | OutboundEvent::ParticipantLeft { .. }
            | OutboundEvent::RoomFull { .. } => None,
        }
    }
}

/// Local link negotiation capability (one per participant)
///
/// Produces and consumes the opaque payloads the server relays.
pub trait LinkNegotiator {
    /// Start a link toward `peer` and return the offer to send it
    fn create_offer(&mut self, peer: ParticipantId) -> Payload;

    /// Consume `peer`'s offer and return the answer
    fn accept_offer(&mut self, peer: ParticipantId, offer: Payload) -> Payload;

    /// Consume `peer`'s answer, completing the link
    fn accept_answer(&mut self, peer: ParticipantId, answer: Payload);

    /// Tear down any link with `peer`
    fn drop_peer(&mut self, _peer: ParticipantId) {}
}

/// Feed one received event to `negotiator` and return what to send back
pub fn respond<N: LinkNegotiator + ?Sized>(
    negotiator: &mut N,
    event: OutboundEvent,
) -> Vec<InboundEvent> {
    let Some(role) = HandshakeRole::for_event(&event) else {
        if let OutboundEvent::ParticipantLeft { id } = event {
            negotiator.drop_peer(id);
        }
        return Vec::new();
    };

    match (role, event) {
        (HandshakeRole::Initiator, OutboundEvent::ParticipantJoined { id }) => {
            vec![InboundEvent::HandshakeOffer {
                target: id,
                payload: negotiator.create_offer(id),
            }]
        }
        (HandshakeRole::Initiator, OutboundEvent::IncomingHandshakeAnswer { from, payload }) => {
            negotiator.accept_answer(from, payload);
            Vec::new()
        }
        (HandshakeRole::Responder, OutboundEvent::IncomingHandshakeOffer { from, payload }) => {
            vec![InboundEvent::HandshakeAnswer {
                target: from,
                payload: negotiator.accept_offer(from, payload),
            }]
        }
        // A newcomer waits for the offers its existing members will send.
        _ => Vec::new(),
    }
}
