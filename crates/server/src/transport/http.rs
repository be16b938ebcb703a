// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::{ApiResponse, ErrorCode};
use crate::gateway::{self, api::ApiRequest};
use crate::registry::StartOutcome;
use crate::transport::{cookie, GatewayEntry, ListenerState};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiForm {
    pub request: String,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<ListenerState>>) -> impl IntoResponse {
    let agents = s.registry.len().await;
    Json(json!({ "status": "running", "agents": agents }))
}

/// `POST /login` — authenticate, start the session, bind a gateway, and
/// issue the session cookie.
pub async fn login(
    State(s): State<Arc<ListenerState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(mut spec) = s.auth.authenticate(&form.username, &form.password).await else {
        return ApiResponse::error(ErrorCode::BadRequest, "invalid credentials").into_response();
    };
    if form.endpoint.is_some() {
        spec.endpoint = form.endpoint;
    }
    let profile = spec.profile.clone();
    let security = spec.security;

    let session = match s.registry.start_agent(spec).await {
        Ok(StartOutcome::Fresh(session)) => session,
        Ok(StartOutcome::Existing(_)) => {
            // The live session is untouched; this attempt aborts.
            return ApiResponse::error(ErrorCode::BadRequest, "already_logged_in")
                .into_response();
        }
        Err(e) => {
            return ApiResponse::error(ErrorCode::UnknownError, e.to_string()).into_response()
        }
    };

    let (gateway, task) =
        gateway::spawn(session.clone(), Arc::clone(&s.registry), s.gateway_cfg.clone());
    let cookie_id = uuid::Uuid::new_v4().to_string();
    s.bind(cookie_id.clone(), GatewayEntry { gateway, session }).await;

    // Unbind the cookie once the gateway (and with it the session) is gone.
    let state = Arc::clone(&s);
    let key = cookie_id.clone();
    tokio::spawn(async move {
        let _ = task.await;
        state.unbind(&key).await;
    });

    info!(agent = %form.username, "agent logged in");
    let body = ApiResponse::value(json!({
        "login": form.username,
        "profile": profile,
        "security": security.as_str(),
    }));
    ([(header::SET_COOKIE, cookie::issue(&cookie_id))], body).into_response()
}

/// `POST /logout` — terminate the session and kill the cookie.
pub async fn logout(State(s): State<Arc<ListenerState>>, headers: HeaderMap) -> Response {
    if let Some(id) = cookie::extract(&headers) {
        if let Some(entry) = s.lookup(&id).await {
            info!(agent = entry.session.login(), "agent logged out");
            // Logout reaches the session before the gateway binding goes
            // away, so the call release is attributed to the logout.
            entry.session.logout().await;
            s.unbind(&id).await;
        }
    }
    ([(header::SET_COOKIE, cookie::invalidate())], ApiResponse::ok()).into_response()
}

/// `POST /api` — one JSON request from the form field `request`.
pub async fn api(
    State(s): State<Arc<ListenerState>>,
    headers: HeaderMap,
    Form(form): Form<ApiForm>,
) -> Response {
    let Some(entry) = session_for(&s, &headers).await else {
        return ApiResponse::error(ErrorCode::BadRequest, "no session for this cookie")
            .into_response();
    };

    let request: ApiRequest = match serde_json::from_str(&form.request) {
        Ok(req) => req,
        Err(e) => {
            return ApiResponse::error(ErrorCode::BadRequest, format!("malformed request: {e}"))
                .into_response()
        }
    };

    entry.gateway.api(request).await.into_response()
}

/// `POST /poll` — register as the long-poll waiter; answers with the next
/// event batch, a replacement error, or a final envelope.
pub async fn poll(State(s): State<Arc<ListenerState>>, headers: HeaderMap) -> Response {
    let Some(entry) = session_for(&s, &headers).await else {
        return ApiResponse::error(ErrorCode::BadRequest, "no session for this cookie")
            .into_response();
    };
    entry.gateway.poll().await.into_response()
}

/// Fallback: unknown paths, including unknown media sub-paths.
pub async fn unknown_path() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(ErrorCode::BadRequest, "unknown path")),
    )
        .into_response()
}

async fn session_for(s: &ListenerState, headers: &HeaderMap) -> Option<GatewayEntry> {
    let id = cookie::extract(headers)?;
    s.lookup(&id).await
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
