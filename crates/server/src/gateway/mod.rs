// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection web gateway.
//!
//! The gateway is the bridge between the stateless HTTP surface and the
//! stateful session: it translates `/api` requests into session operations
//! and buffers session events for long-poll delivery. At most one poll
//! waiter is registered at a time; a newer poll evicts the older one.
//! Events are coalesced for a short window before a flush, and a keep-alive
//! sweep terminates sessions whose client stopped polling.

pub mod api;
pub mod event;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::agent::session::{SessionHandle, StopReason};
use crate::error::{ApiResponse, ErrorCode};
use crate::event::SessionEvent;
use crate::registry::AgentRegistry;

use self::api::{ApiReply, ApiRequest};

/// Capacity of the gateway command channel.
const CHANNEL_CAPACITY: usize = 64;

/// Timing knobs for a gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Coalescing window between the first buffered event and the flush.
    pub flush_window: Duration,
    /// Without a poll for this long (and no waiter), the session dies.
    /// A waiter idle this long gets a synthetic pong instead.
    pub liveness_window: Duration,
    /// Cadence of the liveness sweep.
    pub keepalive_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_millis(500),
            liveness_window: Duration::from_secs(20),
            keepalive_interval: Duration::from_secs(11),
        }
    }
}

enum GatewayCommand {
    Api { request: ApiRequest, reply: oneshot::Sender<ApiReply> },
    Poll { reply: oneshot::Sender<ApiResponse> },
}

/// Cloneable handle held by the listener, keyed by cookie.
#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<GatewayCommand>,
}

impl GatewayHandle {
    /// Run one `/api` request through the gateway.
    pub async fn api(&self, request: ApiRequest) -> ApiReply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(GatewayCommand::Api { request, reply: tx }).await.is_ok() {
            if let Ok(reply) = rx.await {
                return reply;
            }
        }
        ApiReply::ok(ApiResponse::error(ErrorCode::AgentNoexists, "agent session terminated"))
    }

    /// Register the caller as the long-poll waiter and wait for the batch.
    pub async fn poll(&self) -> ApiResponse {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(GatewayCommand::Poll { reply: tx }).await.is_ok() {
            if let Ok(resp) = rx.await {
                return resp;
            }
        }
        ApiResponse::error(ErrorCode::AgentNoexists, "agent session terminated")
    }
}

/// Spawn a gateway bound to `session` (`linkto` semantics: when the session
/// dies, the gateway releases any waiter with a final envelope and exits).
pub fn spawn(
    session: SessionHandle,
    registry: Arc<AgentRegistry>,
    cfg: GatewayConfig,
) -> (GatewayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let events = session.subscribe();
    let gateway = Gateway {
        session,
        registry,
        cfg,
        buffer: VecDeque::new(),
        waiter: None,
        flush_at: None,
        last_poll: Instant::now(),
    };
    let task = tokio::spawn(gateway.run(rx, events));
    (GatewayHandle { tx }, task)
}

struct Waiter {
    reply: oneshot::Sender<ApiResponse>,
    since: Instant,
}

struct Gateway {
    session: SessionHandle,
    registry: Arc<AgentRegistry>,
    cfg: GatewayConfig,
    /// Pending events, FIFO toward the waiter.
    buffer: VecDeque<Value>,
    waiter: Option<Waiter>,
    /// Armed when the buffer goes non-empty; cleared on flush or drain.
    flush_at: Option<Instant>,
    last_poll: Instant,
}

impl Gateway {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<GatewayCommand>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) {
        let mut keepalive = tokio::time::interval(self.cfg.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; consume it so the sweep
        // starts one full interval from now.
        keepalive.tick().await;

        loop {
            let flush_at = self.flush_at;
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(GatewayCommand::Api { request, reply }) => {
                            let result =
                                api::dispatch(&self.session, &self.registry, request).await;
                            let _ = reply.send(result);
                        }
                        Some(GatewayCommand::Poll { reply }) => self.handle_poll(reply),
                        None => {
                            // The listener lost this gateway; the session
                            // must not outlive it.
                            self.session.stop(StopReason::GatewayGone).await;
                            break;
                        }
                    }
                }

                ev = events.recv() => {
                    match ev {
                        Ok(ev) => self.push_event(event::encode(&ev)),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(agent = self.session.login(), missed = n, "event buffer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            self.session_gone();
                            break;
                        }
                    }
                }

                _ = async {
                    match flush_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if flush_at.is_some() => {
                    self.flush_at = None;
                    self.flush();
                }

                _ = keepalive.tick() => {
                    if self.keepalive_sweep().await {
                        break;
                    }
                }
            }
        }

        debug!(agent = self.session.login(), "gateway ended");
    }

    /// A new poll arrived: evict the previous waiter, drain immediately if
    /// events are pending, otherwise register the waiter.
    fn handle_poll(&mut self, reply: oneshot::Sender<ApiResponse>) {
        self.last_poll = Instant::now();

        if let Some(old) = self.waiter.take() {
            let _ = old
                .reply
                .send(ApiResponse::error(ErrorCode::PollPidReplaced, "replaced by a newer poll"));
        }

        if self.buffer.is_empty() {
            self.waiter = Some(Waiter { reply, since: Instant::now() });
        } else {
            self.flush_at = None;
            let events: Vec<Value> = self.buffer.drain(..).collect();
            let _ = reply.send(ApiResponse::value(Value::Array(events)));
        }
    }

    fn push_event(&mut self, ev: Value) {
        self.buffer.push_back(ev);
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.cfg.flush_window);
        }
    }

    /// Drain the buffer to the registered waiter, if both exist.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if let Some(w) = self.waiter.take() {
            let events: Vec<Value> = self.buffer.drain(..).collect();
            let _ = w.reply.send(ApiResponse::value(Value::Array(events)));
        }
    }

    /// Liveness: terminate the session when the client stopped polling, or
    /// push a synthetic pong to a long-idle waiter so it re-polls.
    async fn keepalive_sweep(&mut self) -> bool {
        match &self.waiter {
            None => {
                if self.last_poll.elapsed() >= self.cfg.liveness_window {
                    warn!(
                        agent = self.session.login(),
                        "no poll within liveness window, terminating session"
                    );
                    self.session.stop(StopReason::MissedPolls).await;
                    return true;
                }
            }
            Some(w) => {
                if w.since.elapsed() >= self.cfg.liveness_window && self.buffer.is_empty() {
                    self.push_event(event::pong());
                    self.flush_at = None;
                    self.flush();
                }
            }
        }
        false
    }

    /// `linkto`: the session ended, release any waiter with a final envelope.
    fn session_gone(&mut self) {
        debug!(agent = self.session.login(), "session ended, closing gateway");
        if let Some(w) = self.waiter.take() {
            let _ = w
                .reply
                .send(ApiResponse::error(ErrorCode::AgentNoexists, "agent session terminated"));
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
