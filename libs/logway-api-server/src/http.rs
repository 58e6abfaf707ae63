use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use logway_api::Offset;

use crate::duration::parse_duration;
use crate::error::GatewayError;
use crate::wire::WireEntry;
use crate::AppState;

/// Response header carrying the offset assigned by `/produce`.
pub const X_OFFSET: HeaderName = HeaderName::from_static("x-offset");

// Raw strings: absence and parse failures get our own messages, not the
// extractor's rejection.
#[derive(Deserialize)]
pub(crate) struct ProduceParams {
    topic: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ConsumeParams {
    topic: Option<String>,
    offset: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct PollParams {
    topic: Option<String>,
    offset: Option<String>,
    #[serde(rename = "pollDuration")]
    poll_duration: Option<String>,
}

fn require(value: Option<String>, name: &'static str) -> Result<String, GatewayError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::MissingParam(name))
}

fn parse_offset(raw: &str) -> Result<Offset, GatewayError> {
    raw.parse::<Offset>()
        .map_err(|e| GatewayError::InvalidOffset(format!("{raw:?}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  POST /produce?topic=T   body: {key, value, timestamp}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_produce(
    State(state): State<AppState>,
    Query(params): Query<ProduceParams>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let topic = require(params.topic, "topic")?;
    let wire: WireEntry = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidBody(e.to_string()))?;
    let entry = wire.decode()?;

    let offset = state
        .store
        .append(&topic, entry)
        .await
        .map_err(|e| GatewayError::store("save", e))?;
    tracing::debug!(topic = %topic, offset, "appended entry");

    Ok((StatusCode::CREATED, [(X_OFFSET, offset.to_string())]).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  GET /consume?topic=T&offset=N
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_consume(
    State(state): State<AppState>,
    Query(params): Query<ConsumeParams>,
) -> Result<Response, GatewayError> {
    let topic = require(params.topic, "topic")?;
    let offset = parse_offset(&require(params.offset, "offset")?)?;

    match state
        .store
        .read_at(&topic, offset)
        .await
        .map_err(|e| GatewayError::store("read", e))?
    {
        Some(entry) => Ok(Json(WireEntry::encode(&entry)).into_response()),
        None => Err(GatewayError::OffsetNotFound { topic, offset }),
    }
}

// ═══════════════════════════════════════════════════════════════
//  GET /poll?topic=T&offset=N&pollDuration=D
// ═══════════════════════════════════════════════════════════════

/// 200 with the entry, 204 if the window elapsed empty, 500 on store failure.
pub(crate) async fn handle_poll(
    State(state): State<AppState>,
    Query(params): Query<PollParams>,
) -> Result<Response, GatewayError> {
    let topic = require(params.topic, "topic")?;
    let offset = parse_offset(&require(params.offset, "offset")?)?;
    let requested = parse_duration(&require(params.poll_duration, "pollDuration")?)?;

    let wait = requested.min(state.max_poll);
    if wait < requested {
        tracing::debug!(?requested, ?wait, "poll duration clamped");
    }

    match state
        .store
        .wait_for_next(&topic, offset, wait)
        .await
        .map_err(|e| GatewayError::store("poll", e))?
    {
        Some(entry) => Ok(Json(WireEntry::encode(&entry)).into_response()),
        None => {
            tracing::trace!(topic = %topic, offset, ?wait, "poll window elapsed");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}
