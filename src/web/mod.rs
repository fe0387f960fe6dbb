//! HTTP surface: the terminal WebSocket, the file API, and session listing.
//!
//! Authentication here is a static token map from the config file; it
//! stands in front of the endpoints until an external identity provider is
//! wired in. Everything behind it resolves requests to an owner id and
//! hands off to server-core.

mod files_api;
mod terminal_ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use server_core::{Bridge, FileAccess, SessionInfo, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub files: FileAccess,
    pub registry: Arc<SessionRegistry>,
    pub tokens: HashMap<String, i64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws/terminal/{target_id}", get(terminal_ws::terminal_ws))
        .route("/api/sessions", get(active_sessions))
        .route("/api/targets/{target_id}/files", get(files_api::list))
        .route(
            "/api/targets/{target_id}/file",
            get(files_api::download)
                .put(files_api::upload)
                .delete(files_api::remove),
        )
        .route("/api/targets/{target_id}/dirs", post(files_api::mkdir))
        .route("/api/targets/{target_id}/rename", post(files_api::rename))
        .with_state(Arc::new(state))
}

async fn active_sessions(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
) -> Json<Vec<SessionInfo>> {
    Json(state.registry.active())
}

/// A request resolved to a known user.
///
/// Accepts `Authorization: Bearer <token>` or, for WebSocket upgrades
/// where the browser cannot set headers, a `token` query parameter.
pub struct Authenticated {
    pub owner_id: i64,
}

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .ok_or(StatusCode::UNAUTHORIZED)?;
        state
            .tokens
            .get(&token)
            .map(|&owner_id| Self { owner_id })
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn query_token(parts: &Parts) -> Option<String> {
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_string)
}
