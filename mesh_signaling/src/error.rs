//! Error types for the signaling server

use crate::protocol::{ParticipantId, RoomId};
use thiserror::Error;

/// Errors that can occur during signaling
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The participant's channel no longer accepts events
    #[error("Channel closed for participant {0}")]
    ChannelClosed(ParticipantId),

    /// Unknown participant
    #[error("Unknown participant {0}")]
    UnknownParticipant(ParticipantId),
}

/// Errors from room registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Participant has no live channel (never connected, or already departed)
    #[error("Participant {0} is not connected")]
    NotConnected(ParticipantId),

    /// Joining would exceed the configured room capacity
    #[error("Room {room} is full ({capacity} members)")]
    RoomFull { room: RoomId, capacity: usize },

    /// Reverse lookup and membership sets disagree
    #[error("Registry invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Missing or malformed participant header
    #[error("Missing or invalid X-Participant-Id header")]
    MissingParticipant,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Body could not be read
    #[error("Failed to read body: {0}")]
    Body(String),
}
