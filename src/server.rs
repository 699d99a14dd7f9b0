use crate::error::ProxyError;
use crate::logging::{RouteRecord, SharedJournal};
use crate::proxy::{Gateway, PreparedRequest};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, TokenCountRequest};
use crate::translate::streaming::SseFrame;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Set on 200 responses whose body is an explanatory stand-in because the
/// upstream reply could not be translated.
pub const FALLBACK_HEADER: &str = "x-relay-translation-fallback";

const MESSAGES_PATH: &str = "/v1/messages";
const COUNT_TOKENS_PATH: &str = "/v1/messages/count_tokens";

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub journal: SharedJournal,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route(MESSAGES_PATH, post(handle_messages))
        .route(COUNT_TOKENS_PATH, post(handle_count_tokens))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match parse_body(&state, &body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    let prepared = state.gateway.prepare(&req);
    let route = |status: u16| RouteRecord {
        method: "POST".to_string(),
        path: MESSAGES_PATH.to_string(),
        source_model: req.model.clone(),
        target_model: prepared.resolved.target_model.clone(),
        messages: req.messages.len(),
        tools: req.tools.as_ref().map_or(0, Vec::len),
        stream: req.is_streaming(),
        status,
    };

    let response = if req.is_streaming() {
        handle_streaming(&state, &prepared).await
    } else {
        handle_non_streaming(&state, &prepared).await
    };

    state.journal.route(route(response.status().as_u16()));
    response
}

async fn handle_non_streaming(state: &AppState, prepared: &PreparedRequest) -> Response {
    match state.gateway.complete(prepared).await {
        Ok(outcome) => {
            let fallback = outcome.is_fallback();
            let mut response = Json(outcome.into_response()).into_response();
            if fallback {
                state.journal.error(
                    "server",
                    format!(
                        "Returned translation fallback for {} -> {}",
                        prepared.resolved.original_model, prepared.resolved.target_model
                    ),
                );
                response
                    .headers_mut()
                    .insert(FALLBACK_HEADER, HeaderValue::from_static("true"));
            }
            response
        }
        Err(e) => error_response(state, &e),
    }
}

async fn handle_streaming(state: &AppState, prepared: &PreparedRequest) -> Response {
    let frames = match state.gateway.stream(prepared).await {
        Ok(s) => s,
        Err(e) => return error_response(state, &e),
    };

    let event_stream = frames.map(|frame| -> Result<Event, Infallible> { Ok(to_event(frame)) });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_event(frame: SseFrame) -> Event {
    match frame.event {
        Some(name) => Event::default().event(name).data(frame.data),
        None => Event::default().data(frame.data),
    }
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: TokenCountRequest = match parse_body(&state, &body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    let source_model = req.model.clone();
    let messages = req.messages.len();
    let tools = req.tools.as_ref().map_or(0, Vec::len);

    match state.gateway.count_tokens(req) {
        Ok((prepared, counted)) => {
            state.journal.route(RouteRecord {
                method: "POST".to_string(),
                path: COUNT_TOKENS_PATH.to_string(),
                source_model,
                target_model: prepared.resolved.target_model,
                messages,
                tools,
                stream: false,
                status: 200,
            });
            Json(counted).into_response()
        }
        Err(e) => error_response(&state, &e),
    }
}

async fn handle_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Anthropic Messages relay for DeepSeek and Gemini"
    }))
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn parse_body<T: DeserializeOwned>(state: &AppState, body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        state
            .journal
            .warn("server", format!("Failed to parse request: {}", e));
        let err = ErrorResponse::invalid_request(format!("Invalid request body: {}", e));
        (StatusCode::BAD_REQUEST, Json(err)).into_response()
    })
}

/// Upstream failures keep their status and get the matching Anthropic error
/// type; everything else is a 500 `api_error`.
fn error_response(state: &AppState, err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::error!(status = status.as_u16(), error = %err, "Request failed");
    state.journal.error("server", err.to_string());

    let body = match err {
        ProxyError::Upstream { message, .. } => ErrorResponse::for_status(status.as_u16(), message.clone()),
        other => ErrorResponse::api_error(other.to_string()),
    };
    (status, Json(body)).into_response()
}
