//! Server state shared by HTTP requests
//!
//! Each participant's channel is a [`Mailbox`] that the participant drains by
//! polling. Under `wasmtime serve` a request may land on a fresh instance, so
//! when a state file is configured the whole session (registry, pending
//! events, last activity) is loaded before every operation and saved after it.

use crate::channel::Mailbox;
use crate::config::Config;
use crate::error::SignalingError;
use crate::protocol::{InboundEvent, OutboundEvent, ParticipantId, RoomId};
use crate::registry::RoomRegistry;
use crate::router::{RouterOptions, SignalingRouter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Everything a session needs to resume, as written to the state file
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    registry: RoomRegistry,
    /// Undelivered events per connected participant, oldest first
    mailboxes: HashMap<ParticipantId, Vec<OutboundEvent>>,
    /// Unix milliseconds of each participant's last connect, poll or signal
    last_seen: HashMap<ParticipantId, u64>,
}

impl Snapshot {
    /// Read the state file; a missing or unreadable file yields an empty session
    fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), "Discarding unreadable state file: {err}");
                Self::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                warn!(path = %path.display(), "Failed to read state file: {err}");
                Self::default()
            }
        }
    }

    /// Write through a temporary file so readers never see half a snapshot
    fn save(&self, path: &Path) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(err) => {
                warn!("Failed to encode state: {err}");
                return;
            }
        };
        let tmp = path.with_extension("tmp");
        if let Err(err) = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, path)) {
            warn!(path = %path.display(), "Failed to save state file: {err}");
        }
    }
}

/// Router plus per-participant activity times
struct Session {
    router: SignalingRouter<Mailbox>,
    last_seen: HashMap<ParticipantId, u64>,
}

impl Session {
    fn new(options: RouterOptions) -> Self {
        Self {
            router: SignalingRouter::new(options),
            last_seen: HashMap::new(),
        }
    }

    fn restore(snapshot: Snapshot, options: RouterOptions) -> Self {
        let channels = snapshot
            .mailboxes
            .into_iter()
            .map(|(id, events)| (id, Arc::new(Mailbox::with_events(id, events))));
        let router = SignalingRouter::restore(snapshot.registry, channels, options);
        let mut last_seen = snapshot.last_seen;
        last_seen.retain(|id, _| router.channel(*id).is_some());
        Self { router, last_seen }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            registry: self.router.registry_snapshot(),
            mailboxes: self
                .router
                .channels()
                .into_iter()
                .map(|(id, mailbox)| (id, mailbox.pending()))
                .collect(),
            last_seen: self.last_seen.clone(),
        }
    }

    fn connect(&mut self, now: u64) -> ParticipantId {
        let participant = ParticipantId::random();
        self.router
            .connect(participant, Arc::new(Mailbox::new(participant)));
        self.last_seen.insert(participant, now);
        participant
    }

    fn poll(
        &mut self,
        participant: ParticipantId,
        now: u64,
    ) -> Result<Vec<OutboundEvent>, SignalingError> {
        let mailbox = self
            .router
            .channel(participant)
            .ok_or(SignalingError::UnknownParticipant(participant))?;
        self.last_seen.insert(participant, now);
        Ok(mailbox.drain())
    }

    fn submit(
        &mut self,
        participant: ParticipantId,
        event: InboundEvent,
        now: u64,
    ) -> Result<(), SignalingError> {
        if self.router.channel(participant).is_none() {
            return Err(SignalingError::UnknownParticipant(participant));
        }
        self.last_seen.insert(participant, now);
        self.router.handle(participant, event);
        Ok(())
    }

    fn disconnect(&mut self, participant: ParticipantId) {
        self.last_seen.remove(&participant);
        self.router.disconnect(participant);
    }

    /// Disconnect everyone silent for longer than `timeout`
    fn expire_idle(&mut self, now: u64, timeout: Duration) -> Vec<ParticipantId> {
        let limit = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let expired: Vec<ParticipantId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_sub(**seen) > limit)
            .map(|(id, _)| *id)
            .collect();
        for participant in &expired {
            info!(participant = %participant, "Participant idle, disconnecting");
            self.disconnect(*participant);
        }
        expired
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Cheap-to-clone handle to the server state
#[derive(Clone)]
pub struct ServerState {
    config: Arc<Config>,
    session: Arc<Mutex<Option<Session>>>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a channel for a new participant
    pub fn connect(&self) -> ParticipantId {
        self.with_session(|session, now| session.connect(now))
    }

    /// Take every event queued for `participant`
    pub fn poll(&self, participant: ParticipantId) -> Result<Vec<OutboundEvent>, SignalingError> {
        self.with_session(|session, now| session.poll(participant, now))
    }

    /// Hand an inbound event from a connected participant to the router
    pub fn submit(
        &self,
        participant: ParticipantId,
        event: InboundEvent,
    ) -> Result<(), SignalingError> {
        self.with_session(|session, now| session.submit(participant, event, now))
    }

    pub fn disconnect(&self, participant: ParticipantId) {
        self.with_session(|session, _| session.disconnect(participant))
    }

    pub fn members(&self, room: &RoomId) -> Vec<ParticipantId> {
        self.with_session(|session, _| session.router.members(room))
    }

    /// Load (or reuse) the session, expire idle participants, run `op`, save.
    fn with_session<T>(&self, op: impl FnOnce(&mut Session, u64) -> T) -> T {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let options = self.config.router_options();
        let session = match &self.config.state_file {
            Some(path) => slot.insert(Session::restore(Snapshot::load(path), options)),
            None => slot.get_or_insert_with(|| Session::new(options)),
        };

        let now = unix_millis();
        if let Some(timeout) = self.config.idle_timeout {
            let expired = session.expire_idle(now, timeout);
            if !expired.is_empty() {
                debug!(count = expired.len(), "Expired idle participants");
            }
        }

        let result = op(session, now);
        if let Some(path) = &self.config.state_file {
            session.snapshot().save(path);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use std::path::PathBuf;

    fn file_backed(path: PathBuf) -> impl Fn() -> ServerState {
        let config = Config {
            state_file: Some(path),
            ..Config::default()
        };
        move || ServerState::new(config.clone())
    }

    fn join(room: &str) -> InboundEvent {
        InboundEvent::Join { room: RoomId::new(room) }
    }

    #[test]
    fn connect_queues_id_assigned() {
        let state = ServerState::default();
        let id = state.connect();
        assert_eq!(state.poll(id).unwrap(), vec![OutboundEvent::IdAssigned { id }]);
        assert!(state.poll(id).unwrap().is_empty());
    }

    #[test]
    fn unknown_participant_cannot_poll_or_submit() {
        let state = ServerState::default();
        let stranger = ParticipantId::random();
        assert!(matches!(
            state.poll(stranger),
            Err(SignalingError::UnknownParticipant(_))
        ));
        assert!(state.submit(stranger, InboundEvent::KeepAlive).is_err());
    }

    #[test]
    fn disconnected_participant_is_forgotten() {
        let state = ServerState::default();
        let id = state.connect();
        state.submit(id, join("R1")).unwrap();
        assert_eq!(state.members(&RoomId::new("R1")), vec![id]);

        state.disconnect(id);
        assert!(state.members(&RoomId::new("R1")).is_empty());
        assert!(state.poll(id).is_err());
    }

    #[test]
    fn state_file_carries_session_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = file_backed(dir.path().join("state.json"));

        let a = fresh().connect();
        fresh().submit(a, join("R1")).unwrap();
        let b = fresh().connect();
        fresh().submit(b, join("R1")).unwrap();

        assert_eq!(
            fresh().poll(a).unwrap(),
            vec![
                OutboundEvent::IdAssigned { id: a },
                OutboundEvent::ExistingMembers { ids: vec![] },
                OutboundEvent::ParticipantJoined { id: b },
            ]
        );
        assert_eq!(
            fresh().poll(b).unwrap(),
            vec![
                OutboundEvent::IdAssigned { id: b },
                OutboundEvent::ExistingMembers { ids: vec![a] },
            ]
        );
        assert!(fresh().poll(a).unwrap().is_empty());
        assert_eq!(fresh().members(&RoomId::new("R1")), vec![a, b]);

        fresh().disconnect(a);
        assert!(fresh().poll(a).is_err());
        assert_eq!(fresh().members(&RoomId::new("R1")), vec![b]);
    }

    #[test]
    fn relayed_payload_survives_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = file_backed(dir.path().join("state.json"));
        let (a, b) = (fresh().connect(), fresh().connect());
        fresh().submit(a, join("R1")).unwrap();
        fresh().submit(b, join("R1")).unwrap();
        fresh().poll(a).unwrap();

        let text = r#"{"sdp":"v=0\r\n","ssrc":123456789012345678901234567890,"ts":1.00000000000000000001}"#;
        fresh()
            .submit(
                b,
                InboundEvent::HandshakeOffer {
                    target: a,
                    payload: Payload::from_json(text).unwrap(),
                },
            )
            .unwrap();

        let events = fresh().poll(a).unwrap();
        let [OutboundEvent::IncomingHandshakeOffer { from, payload }] = events.as_slice() else {
            panic!("expected one offer, got {events:?}");
        };
        assert_eq!(*from, b);
        assert_eq!(payload.as_json(), text);
    }

    #[test]
    fn unreadable_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        let fresh = file_backed(path.clone());

        assert!(fresh().members(&RoomId::new("R1")).is_empty());
        let a = fresh().connect();
        assert_eq!(fresh().poll(a).unwrap(), vec![OutboundEvent::IdAssigned { id: a }]);

        let saved: Snapshot = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(saved.registry.is_connected(a));
    }

    #[test]
    fn idle_participants_are_disconnected() {
        let timeout = Duration::from_secs(60);
        let mut session = Session::new(RouterOptions::default());
        let a = session.connect(0);
        let b = session.connect(0);
        session.submit(a, join("R1"), 0).unwrap();
        session.submit(b, join("R1"), 0).unwrap();

        assert!(session.expire_idle(60_000, timeout).is_empty());
        session.poll(b, 50_000).unwrap();

        assert_eq!(session.expire_idle(60_001, timeout), vec![a]);
        assert!(session.poll(a, 60_001).is_err());
        assert_eq!(session.router.members(&RoomId::new("R1")), vec![b]);
    }

    #[test]
    fn keep_alive_counts_as_activity() {
        let timeout = Duration::from_secs(60);
        let mut session = Session::new(RouterOptions::default());
        let a = session.connect(0);
        session.submit(a, InboundEvent::KeepAlive, 30_000).unwrap();

        assert!(session.expire_idle(61_000, timeout).is_empty());
        assert_eq!(session.expire_idle(90_001, timeout), vec![a]);
    }

    #[test]
    fn idle_expiry_announces_departure_when_enabled() {
        let mut session = Session::new(RouterOptions {
            announce_departures: true,
            ..RouterOptions::default()
        });
        let a = session.connect(0);
        let b = session.connect(0);
        session.submit(a, join("R1"), 0).unwrap();
        session.submit(b, join("R1"), 0).unwrap();
        session.poll(a, 100_000).unwrap();

        assert_eq!(session.expire_idle(100_000, Duration::from_secs(60)), vec![b]);
        assert_eq!(
            session.poll(a, 100_000).unwrap(),
            vec![OutboundEvent::ParticipantLeft { id: b }]
        );
    }
}
