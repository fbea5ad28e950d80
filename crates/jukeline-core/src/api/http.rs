//! HTTP route handlers and router construction (component 6).
//!
//! Handlers are kept thin: extract the subscriber identity and request
//! parameters, then delegate to the coordinator. The coordinator is the
//! only place queue state actually changes.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::connection::{EventSink, SinkError};
use super::AppState;
use crate::backend::{PATTERN_ALBUM, PATTERN_ARTIST, PATTERN_FREE_TEXT, PATTERN_TITLE};
use crate::constants::{self, SUBSCRIBER_COOKIE};
use crate::coordinator::VoteKind;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, TimeBonusEvent};
use crate::track::Track;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/search", get(search))
        .route("/up", get(vote_up))
        .route("/down", get(vote_down))
        .route("/unvote", get(unvote))
        .route("/add", post(add_track))
        .route("/upload", post(upload))
        .route("/delete", get(delete_track))
        .route("/next", get(next))
        .route("/playpause", get(play_pause))
        .route("/admin", post(admin))
        .route("/events", get(events_sse))
        .route("/ws", get(events_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn subscriber_cookie(headers: &HeaderMap) -> Option<Uuid> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SUBSCRIBER_COOKIE).then(|| Uuid::parse_str(value).ok()).flatten()
    })
}

/// Returns the caller's subscriber id, and a `Set-Cookie` header to attach
/// to the response if none was present (a fresh id was just minted).
fn subscriber_identity(headers: &HeaderMap) -> (Uuid, Option<String>) {
    match subscriber_cookie(headers) {
        Some(id) => (id, None),
        None => {
            let id = Uuid::new_v4();
            (
                id,
                Some(format!("{SUBSCRIBER_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")),
            )
        }
    }
}

async fn landing_page(headers: HeaderMap) -> impl IntoResponse {
    let (_, set_cookie) = subscriber_identity(&headers);
    let body = Html(
        "<!doctype html><html><head><title>jukeline</title></head><body>\
         <p>jukeline is running.</p></body></html>",
    );
    match set_cookie {
        Some(cookie) => ([(axum::http::header::SET_COOKIE, cookie)], body).into_response(),
        None => body.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub pattern: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl SearchParams {
    fn into_patterns(self) -> HashMap<String, String> {
        [
            (PATTERN_FREE_TEXT, self.pattern),
            (PATTERN_TITLE, self.title),
            (PATTERN_ARTIST, self.artist),
            (PATTERN_ALBUM, self.album),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect()
    }
}

/// Starts an async search and streams partial results to the caller's own
/// connection as private `search` events sharing one id, followed by a
/// `finish-search` event with that same id. Requires the caller to already
/// have a live `/events` or `/ws` connection open.
async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<(), CoreError> {
    let (subscriber, _) = subscriber_identity(&headers);
    let patterns = params.into_patterns();
    if patterns.is_empty() {
        return Err(CoreError::InvalidRequest(
            "at least one of pattern, title, artist, album is required".to_string(),
        ));
    }

    let conn = state
        .connections
        .get(&subscriber)
        .ok_or(CoreError::UnknownSubscriber)?;

    let mut results = state.coordinator.search(patterns);
    let search_id = state.coordinator.current_event_id();
    tokio::spawn(async move {
        while let Some(batch) = results.recv().await {
            conn.send(Event::new(constants::EVENT_SEARCH, search_id, batch)).await;
        }
        conn.send(Event::notification(constants::EVENT_FINISH_SEARCH, search_id))
            .await;
    });
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SongParam {
    pub song: String,
}

async fn vote_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SongParam>,
) -> Result<(), CoreError> {
    vote(state, headers, params, VoteKind::Up).await
}

async fn vote_down(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SongParam>,
) -> Result<(), CoreError> {
    vote(state, headers, params, VoteKind::Down).await
}

async fn unvote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SongParam>,
) -> Result<(), CoreError> {
    vote(state, headers, params, VoteKind::Unvote).await
}

async fn vote(
    state: AppState,
    headers: HeaderMap,
    params: SongParam,
    kind: VoteKind,
) -> Result<(), CoreError> {
    let (subscriber, _) = subscriber_identity(&headers);
    state.coordinator.vote(subscriber, &params.song, kind).await
}

async fn add_track(State(state): State<AppState>, body: Bytes) -> Result<(), CoreError> {
    let track = Track::parse(&body)?;
    state.coordinator.add(track).await;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub song: String,
}

/// Accepts a client-submitted file's raw bytes in the request body,
/// tagged with its original filename via `?song=`, and hands both to the
/// upload backend.
async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(), CoreError> {
    state.coordinator.ingest_upload(&params.song, &body).await
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> CoreResult<()> {
    let (subscriber, _) = subscriber_identity(headers);
    if state.coordinator.is_admin(&subscriber) {
        Ok(())
    } else {
        Err(CoreError::Unauthorized)
    }
}

async fn delete_track(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SongParam>,
) -> Result<(), CoreError> {
    require_admin(&state, &headers).await?;
    state.coordinator.delete(&params.song).await
}

async fn next(State(state): State<AppState>, headers: HeaderMap) -> Result<(), CoreError> {
    require_admin(&state, &headers).await?;
    state.coordinator.next().await;
    Ok(())
}

async fn play_pause(State(state): State<AppState>, headers: HeaderMap) -> Result<(), CoreError> {
    require_admin(&state, &headers).await?;
    state.coordinator.play_pause().await;
    Ok(())
}

async fn admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(), CoreError> {
    let (subscriber, _) = subscriber_identity(&headers);
    let password = String::from_utf8_lossy(&body);
    state.coordinator.promote_admin(subscriber, password.trim())
}

struct SseSink {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl EventSink for SseSink {
    async fn send_json(&mut self, payload: &str) -> Result<(), SinkError> {
        self.tx
            .send(payload.to_string())
            .await
            .map_err(|_| SinkError("sse receiver dropped".to_string()))
    }
}

/// Serializes the private catch-up batch (and the `timeBonus` event, which
/// carries a float payload rather than a `songs` array and so is not an
/// [`Event`]) directly to `sink`, ahead of anything the live delivery loop
/// writes.
async fn deliver_catch_up(
    sink: &mut impl EventSink,
    time_bonus: Option<TimeBonusEvent>,
    events: Vec<Event>,
) -> Result<(), SinkError> {
    if let Some(bonus) = time_bonus {
        let payload = serde_json::to_string(&bonus)
            .map_err(|e| SinkError(format!("failed to serialize time bonus event: {e}")))?;
        sink.send_json(&payload).await?;
    }
    for event in events {
        let payload = serde_json::to_string(&event)
            .map_err(|e| SinkError(format!("failed to serialize event: {e}")))?;
        sink.send_json(&payload).await?;
    }
    Ok(())
}

async fn events_sse(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (subscriber, set_cookie) = subscriber_identity(&headers);
    let (conn, rx) = state.connections.register(subscriber);
    let (catch_up, time_bonus, next_expected) = state.coordinator.catch_up(subscriber);

    let (tx, body_rx) = mpsc::channel::<String>(constants::CONNECTION_EVENT_BUFFER_SIZE);
    let cancel = conn.cancel_token();
    let connections = std::sync::Arc::clone(&state.connections);
    tokio::spawn(async move {
        let mut sink = SseSink { tx };
        if let Err(err) = deliver_catch_up(&mut sink, time_bonus, catch_up).await {
            tracing::debug!(%err, "failed delivering sse catch-up batch");
            connections.close(&conn).await;
            return;
        }
        if let Err(err) = super::connection::serve(rx, cancel, next_expected, sink).await {
            tracing::debug!(%err, "sse delivery loop ended");
        }
        connections.close(&conn).await;
    });

    let stream = ReceiverStream::new(body_rx)
        .map(|payload| Ok::<_, std::convert::Infallible>(SseEvent::default().data(payload)));
    let sse = Sse::new(stream);
    match set_cookie {
        Some(cookie) => ([(axum::http::header::SET_COOKIE, cookie)], sse).into_response(),
        None => sse.into_response(),
    }
}

struct WsSink {
    sender: futures::stream::SplitSink<WebSocket, Message>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send_json(&mut self, payload: &str) -> Result<(), SinkError> {
        use futures::SinkExt;
        self.sender
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}

async fn events_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let (subscriber, _) = subscriber_identity(&headers);
    ws.on_upgrade(move |socket| handle_ws(socket, state, subscriber))
}

/// Drives one websocket connection end to end: registers it, delivers the
/// catch-up batch ahead of live events, then drains inbound frames only to
/// notice disconnect (this transport is currently server-push only).
async fn handle_ws(socket: WebSocket, state: AppState, subscriber: Uuid) {
    let (sender, mut receiver) = socket.split();
    let (conn, rx) = state.connections.register(subscriber);
    let (catch_up, time_bonus, next_expected) = state.coordinator.catch_up(subscriber);

    let cancel = conn.cancel_token();
    let mut sink = WsSink { sender };
    if let Err(err) = deliver_catch_up(&mut sink, time_bonus, catch_up).await {
        tracing::debug!(%err, "failed delivering websocket catch-up batch");
        state.connections.close(&conn).await;
        return;
    }
    let serve_task = tokio::spawn(super::connection::serve(rx, cancel, next_expected, sink));

    while receiver.next().await.is_some() {}
    state.connections.close(&conn).await;
    serve_task.abort();
}
