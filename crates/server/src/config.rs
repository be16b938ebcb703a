// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::agent::session::SessionConfig;
use crate::gateway::GatewayConfig;

/// Agent session server for the call distribution platform.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "SWB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "SWB_PORT", default_value = "5050")]
    pub port: u16,

    /// Path to the JSON agent directory file.
    #[arg(long, env = "SWB_AGENTS_FILE")]
    pub agents_file: PathBuf,

    /// Seconds a call may ring an agent before it is pulled back.
    #[arg(long, env = "SWB_RINGOUT", default_value = "30")]
    pub ringout: u64,

    /// Deadline in seconds for a single media call.
    #[arg(long, env = "SWB_MEDIA_TIMEOUT", default_value = "5")]
    pub media_timeout: u64,

    /// Deadline in seconds for registry and peer-session calls.
    #[arg(long, env = "SWB_PEER_TIMEOUT", default_value = "5")]
    pub peer_timeout: u64,

    /// Event coalescing window in milliseconds before a poll flush.
    #[arg(long, env = "SWB_POLL_FLUSH_MS", default_value = "500")]
    pub poll_flush_ms: u64,

    /// Seconds without a poll before the session is terminated.
    #[arg(long, env = "SWB_POLL_LIVENESS", default_value = "20")]
    pub poll_liveness: u64,

    /// Cadence in seconds of the gateway keep-alive sweep.
    #[arg(long, env = "SWB_KEEPALIVE_INTERVAL", default_value = "11")]
    pub keepalive_interval: u64,

    /// Log format (json or text).
    #[arg(long, env = "SWB_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SWB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.ringout == 0 {
            return Err("--ringout must be positive".to_owned());
        }
        if self.poll_flush_ms == 0 {
            return Err("--poll-flush-ms must be positive".to_owned());
        }
        if self.keepalive_interval == 0 || self.poll_liveness == 0 {
            return Err("liveness windows must be positive".to_owned());
        }
        if self.keepalive_interval > self.poll_liveness {
            return Err("--keepalive-interval must not exceed --poll-liveness".to_owned());
        }
        if self.log_format != "json" && self.log_format != "text" {
            return Err(format!("unknown log format {}", self.log_format));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ringout: Duration::from_secs(self.ringout),
            media_timeout: Duration::from_secs(self.media_timeout),
            peer_timeout: Duration::from_secs(self.peer_timeout),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            flush_window: Duration::from_millis(self.poll_flush_ms),
            liveness_window: Duration::from_secs(self.poll_liveness),
            keepalive_interval: Duration::from_secs(self.keepalive_interval),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
