//! WASI-compatible signaling server for full-mesh WebRTC rooms
//!
//! The server never carries media. It tells each participant who else is in
//! its room and relays the opaque handshake payloads (session descriptions,
//! connectivity candidates) participants exchange to build direct links.
//!
//! # Protocol
//!
//! A participant joining a room receives `existing-members` (everyone who
//! joined before it); each of those members receives `participant-joined`
//! and sends the newcomer a `handshake-offer`. The newcomer replies with a
//! `handshake-answer`. The server routes both shapes to the named target as
//! long as it shares the sender's room, and drops them otherwise.
//!
//! # Transport
//!
//! Over HTTP long-polling (see [`handler`]):
//!
//! - **POST /connect** - Open a channel, returns `{"participant_id": "<uuid>"}`
//! - **GET /poll?participant_id={id}** - Drain queued events
//! - **POST /signal** - Send an event (`X-Participant-Id` header required)
//! - **POST /disconnect** - Close the channel
//! - **GET /rooms/{room}** - Current members
//! - **GET /health** - Health check
//!
//! `wasmtime serve` may run each request in a fresh instance, so live state
//! (rooms, queued events, last activity) is kept in a JSON state file and
//! reloaded on every request. Participants that stop polling are dropped
//! after an idle timeout.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! wasmtime serve -S common --addr 127.0.0.1:3536 mesh-signaling-wasm.wasm
//!
//! # Open a channel
//! curl -X POST http://127.0.0.1:3536/connect
//!
//! # Join a room
//! curl -X POST -H "X-Participant-Id: <your-id>" \
//!   -d '{"type":"join","room":"R1"}' http://127.0.0.1:3536/signal
//!
//! # Poll for events
//! curl "http://127.0.0.1:3536/poll?participant_id=<your-id>"
//! ```

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod negotiation;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod state;

pub use channel::{Channel, Mailbox, Switchboard};
pub use config::{Config, ConfigError};
pub use error::{ClientRequestError, RegistryError, SignalingError};
pub use handler::handle_request;
pub use negotiation::{HandshakeRole, LinkNegotiator, respond};
pub use protocol::{InboundEvent, OutboundEvent, ParticipantId, Payload, RoomId};
pub use registry::{JoinOutcome, ParticipantPhase, RoomRegistry};
pub use router::{RouterOptions, SignalingRouter};
pub use state::ServerState;
