// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener adapter: the stateless HTTP front door.
//!
//! The listener authenticates, creates a web gateway per logged-in agent,
//! and routes `/api` and `/poll` to it by cookie. Gateway and session
//! lifecycles are linked; when either ends, the cookie binding is dropped.

pub mod cookie;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::session::SessionHandle;
use crate::auth::AuthStore;
use crate::gateway::{GatewayConfig, GatewayHandle};
use crate::registry::AgentRegistry;

/// One authenticated connection: the gateway and its session.
#[derive(Clone)]
pub struct GatewayEntry {
    pub gateway: GatewayHandle,
    pub session: SessionHandle,
}

/// Shared listener state, passed to handlers via the axum `State` extractor.
pub struct ListenerState {
    pub registry: Arc<AgentRegistry>,
    pub auth: Arc<dyn AuthStore>,
    pub gateway_cfg: GatewayConfig,
    /// Cookie value -> live gateway.
    gateways: RwLock<HashMap<String, GatewayEntry>>,
}

impl ListenerState {
    pub fn new(
        registry: Arc<AgentRegistry>,
        auth: Arc<dyn AuthStore>,
        gateway_cfg: GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self { registry, auth, gateway_cfg, gateways: RwLock::new(HashMap::new()) })
    }

    pub async fn lookup(&self, cookie: &str) -> Option<GatewayEntry> {
        self.gateways.read().await.get(cookie).cloned()
    }

    pub async fn bind(&self, cookie: String, entry: GatewayEntry) {
        self.gateways.write().await.insert(cookie, entry);
    }

    pub async fn unbind(&self, cookie: &str) -> Option<GatewayEntry> {
        self.gateways.write().await.remove(cookie)
    }
}

/// Build the axum router with all listener routes.
pub fn build_router(state: Arc<ListenerState>) -> Router {
    Router::new()
        .route("/login", post(http::login))
        .route("/logout", post(http::logout))
        .route("/api", post(http::api))
        .route("/poll", post(http::poll))
        .route("/api/v1/health", get(http::health))
        .fallback(http::unknown_path)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
