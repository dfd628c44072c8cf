//! Room membership bookkeeping
//!
//! The registry is the single source of truth for which participant is in
//! which room. It is a plain value; callers serialize access to it (the
//! router keeps it behind a mutex).

use crate::error::RegistryError;
use crate::protocol::{ParticipantId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where a participant stands from the router's point of view
///
/// `Joining` is never observable: a join happens inside one critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantPhase {
    Unjoined,
    Member(RoomId),
    /// Disconnected, or never connected
    Departed,
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Members ahead of the joiner, in join order
    pub prior_members: Vec<ParticipantId>,
    /// False when the participant was already a member of this room
    pub newly_joined: bool,
    /// Room the participant was moved out of by a cross-room join
    pub left_room: Option<RoomId>,
}

/// Serializable so the HTTP transport can carry it between requests
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RoomRegistry {
    /// Room -> members in join order
    rooms: HashMap<RoomId, Vec<ParticipantId>>,
    /// Connected participant -> current room
    presence: HashMap<ParticipantId, Option<RoomId>>,
    /// Comes from configuration, not from saved state
    #[serde(skip)]
    max_room_size: Option<usize>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_room_size(max_room_size: Option<usize>) -> Self {
        Self {
            max_room_size,
            ..Self::default()
        }
    }

    pub fn set_max_room_size(&mut self, max_room_size: Option<usize>) {
        self.max_room_size = max_room_size;
    }

    /// Register a live channel. Returns false if it was already connected.
    pub fn connect(&mut self, participant: ParticipantId) -> bool {
        if self.presence.contains_key(&participant) {
            return false;
        }
        self.presence.insert(participant, None);
        true
    }

    /// Add `participant` to `room` and return the members that were there before it.
    ///
    /// A second join to the same room changes nothing and returns the same
    /// snapshot. A join to a different room leaves the current one first.
    pub fn join(
        &mut self,
        room: &RoomId,
        participant: ParticipantId,
    ) -> Result<JoinOutcome, RegistryError> {
        let current = self
            .presence
            .get(&participant)
            .ok_or(RegistryError::NotConnected(participant))?
            .clone();

        if current.as_ref() == Some(room) {
            let members = self.rooms.get(room).map(Vec::as_slice).unwrap_or_default();
            let prior_members = members
                .iter()
                .take_while(|member| **member != participant)
                .copied()
                .collect();
            return Ok(JoinOutcome {
                prior_members,
                newly_joined: false,
                left_room: None,
            });
        }

        let prior_members = self.members(room);
        if let Some(capacity) = self.max_room_size {
            if prior_members.len() >= capacity {
                return Err(RegistryError::RoomFull {
                    room: room.clone(),
                    capacity,
                });
            }
        }

        let left_room = match current {
            Some(previous) => {
                self.remove_member(&previous, participant);
                Some(previous)
            }
            None => None,
        };

        self.rooms
            .entry(room.clone())
            .or_default()
            .push(participant);
        self.presence.insert(participant, Some(room.clone()));

        Ok(JoinOutcome {
            prior_members,
            newly_joined: true,
            left_room,
        })
    }

    /// Remove `participant` from `room`. Returns whether membership changed.
    pub fn leave(&mut self, room: &RoomId, participant: ParticipantId) -> bool {
        let Some(current) = self.presence.get_mut(&participant) else {
            return false;
        };
        if current.as_ref() != Some(room) {
            return false;
        }
        *current = None;
        self.remove_member(room, participant)
    }

    /// Drop a participant entirely, leaving its room. Returns the room it was in.
    pub fn disconnect(&mut self, participant: ParticipantId) -> Option<RoomId> {
        let room = self.presence.remove(&participant)??;
        self.remove_member(&room, participant);
        Some(room)
    }

    /// Snapshot of a room's members in join order; empty for unknown rooms
    pub fn members(&self, room: &RoomId) -> Vec<ParticipantId> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn room_of(&self, participant: ParticipantId) -> Option<RoomId> {
        self.presence.get(&participant).cloned().flatten()
    }

    pub fn phase(&self, participant: ParticipantId) -> ParticipantPhase {
        match self.presence.get(&participant) {
            Some(Some(room)) => ParticipantPhase::Member(room.clone()),
            Some(None) => ParticipantPhase::Unjoined,
            None => ParticipantPhase::Departed,
        }
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.presence.contains_key(&participant)
    }

    pub fn connected(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.presence.keys().copied()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Verify the reverse index agrees with the membership sets.
    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for (room, members) in &self.rooms {
            if members.is_empty() {
                return Err(RegistryError::InvariantViolation(format!(
                    "empty room {room} was not pruned"
                )));
            }
            for member in members {
                if !seen.insert(*member) {
                    return Err(RegistryError::InvariantViolation(format!(
                        "{member} is listed more than once"
                    )));
                }
                if self.presence.get(member) != Some(&Some(room.clone())) {
                    return Err(RegistryError::InvariantViolation(format!(
                        "{member} is listed in {room} but room_of disagrees"
                    )));
                }
            }
        }
        for (participant, room) in &self.presence {
            if room.is_some() && !seen.contains(participant) {
                return Err(RegistryError::InvariantViolation(format!(
                    "room_of({participant}) names a room that does not list it"
                )));
            }
        }
        Ok(())
    }

    fn remove_member(&mut self, room: &RoomId, participant: ParticipantId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let before = members.len();
        members.retain(|member| *member != participant);
        let changed = members.len() != before;
        if members.is_empty() {
            self.rooms.remove(room);
        }
        changed
    }
}
