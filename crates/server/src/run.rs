// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server runner — shared by `main` and integration tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::{AuthStore, FileAuthStore};
use crate::config::Config;
use crate::media::OutboundMediaFactory;
use crate::registry::AgentRegistry;
use crate::transport::{build_router, ListenerState};

/// Pluggable collaborators. The default wiring reads the agents file and
/// runs without an outbound media factory; embedders and tests inject their
/// own.
pub struct Services {
    pub auth: Arc<dyn AuthStore>,
    pub outbound: Option<Arc<dyn OutboundMediaFactory>>,
}

/// Initialize the tracing subscriber from the config.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Full startup path used by `main`.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    let auth = FileAuthStore::load(&config.agents_file)?;
    info!(agents = auth.len(), "agent directory loaded");
    serve(config, Services { auth: Arc::new(auth), outbound: None }).await
}

/// Serve until SIGINT/SIGTERM.
pub async fn serve(config: Config, services: Services) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let registry =
        AgentRegistry::new(config.session_config(), services.outbound, shutdown.clone());
    let state = ListenerState::new(registry, services.auth, config.gateway_config());
    let app = build_router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
