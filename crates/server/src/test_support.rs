// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, stub collaborators, and assertion
//! helpers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::agent::session::{SessionConfig, SessionHandle};
use crate::agent::{AgentSpec, SecurityLevel, Skill};
use crate::auth::AuthStore;
use crate::error::ApiError;
use crate::event::SessionEvent;
use crate::media::{
    Call, CallDirection, Client, MediaDriver, MediaError, MediaResult, MediaType,
    OutboundMediaFactory, PathMode,
};
use crate::registry::{AgentRegistry, StartOutcome};

/// Media driver that records every call made against it. Individual
/// operations can be scripted to fail or to hang past the media deadline.
#[derive(Default)]
pub struct StubMediaDriver {
    log: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, MediaError>>,
    hangs: Mutex<Vec<String>>,
}

impl StubMediaDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script `op` to fail with `err`.
    pub fn fail(&self, op: &str, err: MediaError) {
        self.failures.lock().insert(op.to_owned(), err);
    }

    /// Script `op` to never complete.
    pub fn hang(&self, op: &str) {
        self.hangs.lock().push(op.to_owned());
    }

    /// Operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    async fn record(&self, entry: String, op: &str) -> MediaResult<()> {
        self.log.lock().push(entry);
        let should_hang = self.hangs.lock().iter().any(|h| h == op);
        if should_hang {
            std::future::pending::<()>().await;
        }
        let failure = self.failures.lock().get(op).cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MediaDriver for StubMediaDriver {
    async fn pickup(&self) -> MediaResult<()> {
        self.record("pickup".to_owned(), "pickup").await
    }

    async fn unring(&self) -> MediaResult<()> {
        self.record("unring".to_owned(), "unring").await
    }

    async fn hangup(&self, reason: &str) -> MediaResult<()> {
        self.record(format!("hangup:{reason}"), "hangup").await
    }

    async fn dial(&self, number: &str) -> MediaResult<()> {
        self.record(format!("dial:{number}"), "dial").await
    }

    async fn command(&self, name: &str, args: &[Value]) -> MediaResult<Value> {
        self.record(format!("command:{name}"), "command").await?;
        Ok(serde_json::json!({ "command": name, "args": args }))
    }

    async fn cast(&self, name: &str, _args: &[Value]) {
        self.log.lock().push(format!("cast:{name}"));
    }

    async fn agent_transfer(
        &self,
        target: &SessionHandle,
        case_id: Option<&str>,
    ) -> MediaResult<()> {
        let entry = match case_id {
            Some(case) => format!("agent_transfer:{}:{case}", target.login()),
            None => format!("agent_transfer:{}", target.login()),
        };
        self.record(entry, "agent_transfer").await
    }

    async fn queue_transfer(
        &self,
        queue: &str,
        _vars: &Value,
        _skills: &[Skill],
    ) -> MediaResult<()> {
        self.record(format!("queue_transfer:{queue}"), "queue_transfer").await
    }

    async fn warm_transfer(&self, destination: &str) -> MediaResult<()> {
        self.record(format!("warm_transfer:{destination}"), "warm_transfer").await
    }

    async fn warm_transfer_complete(&self) -> MediaResult<()> {
        self.record("warm_transfer_complete".to_owned(), "warm_transfer_complete").await
    }

    async fn warm_transfer_cancel(&self) -> MediaResult<()> {
        self.record("warm_transfer_cancel".to_owned(), "warm_transfer_cancel").await
    }

    async fn spy(&self, spy_login: &str, _spy_endpoint: Option<&str>) -> MediaResult<()> {
        self.record(format!("spy:{spy_login}"), "spy").await
    }
}

/// Build a voice call owned by `driver`.
pub fn test_call(id: &str, driver: Arc<StubMediaDriver>) -> Call {
    Call {
        id: id.to_owned(),
        media_type: MediaType::Voice,
        source: driver,
        callerid: ("Ada Lovelace".to_owned(), "5551212".to_owned()),
        client: Some(Client { id: "c1".to_owned(), label: "Initech".to_owned() }),
        direction: CallDirection::Inbound,
        ring_path: PathMode::Inband,
        media_path: PathMode::Inband,
        skills: vec![Skill::atom("english")],
    }
}

/// Same, with an explicit media type and direction.
pub fn test_call_of(
    id: &str,
    media_type: MediaType,
    direction: CallDirection,
    driver: Arc<StubMediaDriver>,
) -> Call {
    Call { media_type, direction, ..test_call(id, driver) }
}

/// Outbound factory returning calls backed by a fresh stub driver.
#[derive(Default)]
pub struct StubOutboundFactory {
    pub created: Mutex<Vec<String>>,
}

#[async_trait]
impl OutboundMediaFactory for StubOutboundFactory {
    async fn create(
        &self,
        client: &str,
        media_type: MediaType,
        _agent: SessionHandle,
    ) -> MediaResult<Call> {
        if media_type != MediaType::Voice {
            return Err(MediaError::Noexists);
        }
        self.created.lock().push(client.to_owned());
        let driver = StubMediaDriver::new();
        Ok(test_call_of("out-1", media_type, CallDirection::Outbound, driver))
    }
}

/// In-memory auth store for listener tests.
#[derive(Default)]
pub struct StubAuthStore {
    agents: HashMap<String, (String, AgentSpec)>,
}

impl StubAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, spec: AgentSpec, password: &str) -> Self {
        self.agents.insert(spec.login.clone(), (password.to_owned(), spec));
        self
    }
}

#[async_trait]
impl AuthStore for StubAuthStore {
    async fn authenticate(&self, login: &str, secret: &str) -> Option<AgentSpec> {
        let (password, spec) = self.agents.get(login)?;
        crate::auth::constant_time_eq(password, secret).then(|| spec.clone())
    }
}

/// An agent spec with test defaults.
pub fn agent_spec(login: &str) -> AgentSpec {
    AgentSpec {
        login: login.to_owned(),
        id: format!("id-{login}"),
        profile: "Default".to_owned(),
        security: SecurityLevel::Agent,
        skills: vec![Skill::atom("english")],
        endpoint: None,
    }
}

pub fn supervisor_spec(login: &str) -> AgentSpec {
    AgentSpec { security: SecurityLevel::Supervisor, ..agent_spec(login) }
}

/// Registry plus the spawned session for one agent, with fast timeouts.
pub struct SessionCtx {
    pub registry: Arc<AgentRegistry>,
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<SessionEvent>,
    pub shutdown: CancellationToken,
}

/// Builder for a registry-backed session under test.
pub struct SessionBuilder {
    spec: AgentSpec,
    cfg: SessionConfig,
    outbound: Option<Arc<dyn OutboundMediaFactory>>,
    registry: Option<Arc<AgentRegistry>>,
}

impl SessionBuilder {
    pub fn new(login: &str) -> Self {
        Self {
            spec: agent_spec(login),
            cfg: SessionConfig {
                ringout: Duration::from_secs(30),
                media_timeout: Duration::from_secs(5),
                peer_timeout: Duration::from_secs(5),
            },
            outbound: None,
            registry: None,
        }
    }

    pub fn spec(mut self, spec: AgentSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn ringout(mut self, ringout: Duration) -> Self {
        self.cfg.ringout = ringout;
        self
    }

    pub fn outbound(mut self, factory: Arc<dyn OutboundMediaFactory>) -> Self {
        self.outbound = Some(factory);
        self
    }

    /// Reuse an existing registry so several sessions share a cluster.
    pub fn registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn spawn(self) -> Result<SessionCtx, ApiError> {
        let shutdown = CancellationToken::new();
        let registry = self.registry.unwrap_or_else(|| {
            AgentRegistry::new(self.cfg.clone(), self.outbound.clone(), shutdown.clone())
        });
        let handle = match registry.start_agent(self.spec).await {
            Ok(StartOutcome::Fresh(handle)) | Ok(StartOutcome::Existing(handle)) => handle,
            Err(e) => {
                return Err(crate::error::ErrorCode::UnknownError.err(e.to_string()));
            }
        };
        let events = handle.subscribe();
        Ok(SessionCtx { registry, handle, events, shutdown })
    }
}

/// Receive the next session event within a second of (virtual) time.
pub async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.ok()?.ok()
}

/// Receive the next state-change event, skipping everything else.
pub async fn next_state(rx: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
    loop {
        match next_event(rx).await? {
            ev @ SessionEvent::State { .. } => return Some(ev),
            _ => continue,
        }
    }
}
