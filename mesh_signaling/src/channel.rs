//! Per-participant delivery channels
//!
//! A channel is the ordered, reliable pipe from the server to one
//! participant. The router only relies on [`Channel::deliver`]; how events
//! reach the remote side is up to the transport.

use crate::error::SignalingError;
use crate::protocol::{OutboundEvent, ParticipantId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Outbound half of a participant's channel
pub trait Channel: Send + Sync {
    /// Queue an event for delivery. Must not block.
    fn deliver(&self, event: OutboundEvent) -> Result<(), SignalingError>;

    /// Called once when the participant disconnects
    fn close(&self) {}
}

/// Buffered channel drained by the participant (long-polling)
#[derive(Debug)]
pub struct Mailbox {
    owner: ParticipantId,
    inner: Mutex<MailboxInner>,
}

#[derive(Debug, Default)]
struct MailboxInner {
    events: VecDeque<OutboundEvent>,
    closed: bool,
}

impl Mailbox {
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            owner,
            inner: Mutex::new(MailboxInner::default()),
        }
    }

    /// Mailbox already holding `events`, as when reloading saved state
    pub fn with_events(owner: ParticipantId, events: impl IntoIterator<Item = OutboundEvent>) -> Self {
        Self {
            owner,
            inner: Mutex::new(MailboxInner {
                events: events.into_iter().collect(),
                closed: false,
            }),
        }
    }

    /// Copy of the pending events, oldest first
    pub fn pending(&self) -> Vec<OutboundEvent> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.events.iter().cloned().collect()
    }

    /// Take every pending event, oldest first
    pub fn drain(&self) -> Vec<OutboundEvent> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl Channel for Mailbox {
    fn deliver(&self, event: OutboundEvent) -> Result<(), SignalingError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Err(SignalingError::ChannelClosed(self.owner));
        }
        inner.events.push_back(event);
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        inner.events.clear();
    }
}

/// Owns the channel handle of every connected participant
///
/// Kept apart from room membership: the registry only ever sees identifiers.
pub struct Switchboard<C> {
    channels: RwLock<HashMap<ParticipantId, Arc<C>>>,
}

impl<C> Default for Switchboard<C> {
    fn default() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: Channel> Switchboard<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, participant: ParticipantId, channel: Arc<C>) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(participant, channel);
    }

    /// Remove and close a participant's channel
    pub fn detach(&self, participant: ParticipantId) -> Option<Arc<C>> {
        let channel = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&participant)?;
        channel.close();
        Some(channel)
    }

    pub fn get(&self, participant: ParticipantId) -> Option<Arc<C>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&participant)
            .cloned()
    }

    pub fn send(
        &self,
        participant: ParticipantId,
        event: OutboundEvent,
    ) -> Result<(), SignalingError> {
        self.get(participant)
            .ok_or(SignalingError::UnknownParticipant(participant))?
            .deliver(event)
    }

    /// Every attached channel, in no particular order
    pub fn entries(&self) -> Vec<(ParticipantId, Arc<C>)> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(participant, channel)| (*participant, Arc::clone(channel)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
