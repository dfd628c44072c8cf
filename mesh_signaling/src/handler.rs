//! HTTP long-polling transport for the WASM signaling server
//!
//! Every participant's channel is a server-side mailbox. Participants open a
//! channel with `POST /connect`, drain it with `GET /poll`, push events with
//! `POST /signal` and close it with `POST /disconnect`.

use crate::error::ClientRequestError;
use crate::protocol::{InboundEvent, OutboundEvent, ParticipantId, RoomId};
use crate::state::ServerState;
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, error};
use wstd::http::{Body, Method, Request, Response};

/// Header naming the participant on `POST` requests
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

const USAGE: &str = "Mesh WASI Signaling Server (Long-Polling)\n\
                     \n\
                     Endpoints:\n\
                     - GET /health - Health check\n\
                     - POST /connect - Open a channel, returns {\"participant_id\": \"uuid\"}\n\
                     - GET /poll?participant_id={id} - Drain queued events\n\
                     - POST /signal - Send an event (X-Participant-Id header required)\n\
                     - POST /disconnect - Close the channel (X-Participant-Id header required)\n\
                     - GET /rooms/{room} - Current members of a room (percent-encoded name)\n\
                     \n\
                     Events sent with /signal:\n\
                     - {\"type\":\"join\",\"room\":\"R1\"}\n\
                     - {\"type\":\"handshake-offer\",\"target\":\"uuid\",\"payload\":...}\n\
                     - {\"type\":\"handshake-answer\",\"target\":\"uuid\",\"payload\":...}\n\
                     - {\"type\":\"keep-alive\"}\n";

#[derive(Serialize)]
struct ConnectResponse {
    participant_id: ParticipantId,
}

#[derive(Serialize)]
struct PollResponse {
    events: Vec<OutboundEvent>,
}

#[derive(Serialize)]
struct MembersResponse {
    room: RoomId,
    members: Vec<ParticipantId>,
}

/// Endpoint selected by method and path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Preflight,
    Health,
    Index,
    Connect,
    Poll,
    Signal,
    Disconnect,
    Members(RoomId),
    NotFound,
}

impl Route {
    pub fn resolve(method: &Method, path: &str) -> Self {
        if *method == Method::OPTIONS {
            return Route::Preflight;
        }
        let path = path.trim_end_matches('/');

        if *method == Method::POST {
            return match path {
                "/connect" => Route::Connect,
                "/signal" => Route::Signal,
                "/disconnect" => Route::Disconnect,
                _ => Route::NotFound,
            };
        }
        if *method != Method::GET {
            return Route::NotFound;
        }

        match path {
            "" => Route::Index,
            "/health" => Route::Health,
            "/poll" => Route::Poll,
            _ => match path.strip_prefix("/rooms/") {
                Some(segment) if !segment.is_empty() && !segment.contains('/') => {
                    match urlencoding::decode(segment) {
                        Ok(room) => Route::Members(RoomId::new(room)),
                        Err(_) => Route::NotFound,
                    }
                }
                _ => Route::NotFound,
            },
        }
    }
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

fn participant_from_header(request: &Request<Body>) -> Result<ParticipantId, ClientRequestError> {
    request
        .headers()
        .get(PARTICIPANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| ParticipantId::from_str(s).ok())
        .ok_or(ClientRequestError::MissingParticipant)
}

fn reply(state: &ServerState, status: u16, content_type: &str, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("access-control-allow-origin", state.config().allowed_origin.as_str())
        .body(Body::from(body))
        .unwrap_or_else(|err| {
            error!("Failed to build response: {err}");
            Response::new(Body::empty())
        })
}

fn text(state: &ServerState, status: u16, body: impl Into<String>) -> Response<Body> {
    reply(state, status, "text/plain", body.into())
}

/// Serialize `value` directly, so relayed payload text is written out unchanged
fn json(state: &ServerState, value: &impl Serialize) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => reply(state, 200, "application/json", body),
        Err(err) => {
            error!("Failed to encode response: {err}");
            text(state, 500, "Internal Server Error")
        }
    }
}

fn handle_connect(state: &ServerState) -> Response<Body> {
    let participant_id = state.connect();
    json(state, &ConnectResponse { participant_id })
}

fn handle_poll(query: Option<&str>, state: &ServerState) -> Response<Body> {
    let Some(participant) = get_query_param(query, "participant_id")
        .and_then(|s| ParticipantId::from_str(s).ok())
    else {
        return text(state, 400, "Missing or invalid participant_id");
    };

    match state.poll(participant) {
        Ok(events) => json(state, &PollResponse { events }),
        Err(err) => text(state, 404, err.to_string()),
    }
}

async fn read_event(request: Request<Body>) -> Result<(ParticipantId, InboundEvent), ClientRequestError> {
    let participant = participant_from_header(&request)?;
    let mut body = request.into_body();
    let contents = body
        .str_contents()
        .await
        .map_err(|e| ClientRequestError::Body(format!("{e:?}")))?;
    let event = InboundEvent::from_str(contents)?;
    Ok((participant, event))
}

async fn handle_signal(request: Request<Body>, state: &ServerState) -> Response<Body> {
    let (participant, event) = match read_event(request).await {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("Rejected signal request: {err}");
            return text(state, 400, err.to_string());
        }
    };

    match state.submit(participant, event) {
        Ok(()) => text(state, 200, "OK"),
        Err(err) => text(state, 404, err.to_string()),
    }
}

fn handle_disconnect(request: &Request<Body>, state: &ServerState) -> Response<Body> {
    match participant_from_header(request) {
        Ok(participant) => {
            state.disconnect(participant);
            text(state, 200, "OK")
        }
        Err(err) => text(state, 400, err.to_string()),
    }
}

fn handle_cors_preflight(state: &ServerState) -> Response<Body> {
    Response::builder()
        .status(204)
        .header("access-control-allow-origin", state.config().allowed_origin.as_str())
        .header("access-control-allow-methods", "GET, POST, OPTIONS")
        .header("access-control-allow-headers", "content-type, x-participant-id")
        .header("access-control-max-age", "86400")
        .body(Body::empty())
        .unwrap_or_else(|err| {
            error!("Failed to build preflight response: {err}");
            Response::new(Body::empty())
        })
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = match Route::resolve(&method, uri.path()) {
        Route::Preflight => handle_cors_preflight(state),
        Route::Health => text(state, 200, "OK"),
        Route::Index => text(state, 200, USAGE),
        Route::Connect => handle_connect(state),
        Route::Poll => handle_poll(uri.query(), state),
        Route::Signal => handle_signal(request, state).await,
        Route::Disconnect => handle_disconnect(&request, state),
        Route::Members(room) => {
            let members = state.members(&room);
            json(state, &MembersResponse { room, members })
        }
        Route::NotFound => text(state, 404, "Not Found"),
    };
    Ok(response)
}
