// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-agent session actor.
//!
//! All inputs — client commands, media notices, registry traffic, the ring
//! timer — funnel through one mpsc channel and are handled to completion in
//! arrival order, so the session is the only mutator of the agent's
//! observable state. Outgoing calls to media and peer sessions are the only
//! suspension points and are bounded by per-call timeouts.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::fsm;
use crate::agent::{
    AgentSnapshot, AgentSpec, AgentState, ReleaseReason, SecurityLevel, Skill, StateName,
};
use crate::error::{ApiError, ErrorCode};
use crate::event::{SessionEvent, TabAction};
use crate::media::{
    Call, MediaCommandMode, MediaNotice, MediaResult, MediaType, OutboundMediaFactory,
};
use crate::registry::AgentRegistry;

/// Capacity of the command channel and the event broadcast.
const CHANNEL_CAPACITY: usize = 256;

/// Return the current UTC time as milliseconds since the Unix epoch.
pub fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Successful operation results.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Applied.
    Accepted,
    /// A release requested mid-call, recorded for when the call ends.
    Queued,
    /// A media or query result to hand back to the caller.
    Value(Value),
}

/// Why a session is being torn down from outside the normal logout path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MissedPolls,
    GatewayGone,
    Kicked,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissedPolls => "missed_polls",
            Self::GatewayGone => "gateway_gone",
            Self::Kicked => "kicked",
        }
    }
}

pub(crate) type OpReply = oneshot::Sender<Result<Outcome, ApiError>>;

/// Inputs to the session actor. Public operations carry a reply channel;
/// notifications are fire-and-forget.
pub(crate) enum SessionCommand {
    SetState { target: StateName, reason: Option<ReleaseReason>, reply: OpReply },
    SetEndpoint { endpoint: String, reply: OpReply },
    ChangeProfile { profile: String, reply: OpReply },
    Dial { number: String, reply: OpReply },
    AgentTransfer { target: String, case_id: Option<String>, reply: OpReply },
    QueueTransfer { queue: String, vars: Value, skills: Vec<Skill>, reply: OpReply },
    WarmTransfer { destination: String, reply: OpReply },
    WarmTransferComplete { reply: OpReply },
    WarmTransferCancel { reply: OpReply },
    MediaCommand { name: String, mode: MediaCommandMode, args: Vec<Value>, reply: OpReply },
    MediaHangup { reply: OpReply },
    InitOutbound { client: String, media_type: MediaType, reply: OpReply },
    /// A queue offers a call to this agent.
    Ring { call: Call, reply: OpReply },
    /// Supervisor-side: start spying on `target`.
    Spy { target: String, reply: OpReply },
    /// Target-side of spy: open a read-only leg on the active call.
    Tap { spy_login: String, spy_endpoint: Option<String>, reply: OpReply },
    Blab { text: String },
    SupervisorTab { action: TabAction, id: String, profile: String },
    Media(MediaNotice),
    DumpState { reply: oneshot::Sender<AgentSnapshot> },
    Logout { reply: oneshot::Sender<()> },
    Stop { reason: StopReason },
}

fn session_gone() -> ApiError {
    ErrorCode::AgentNoexists.err("agent session terminated")
}

fn invalid(from: StateName, to: StateName) -> ApiError {
    ErrorCode::InvalidStateChange.err(format!("cannot move from {from} to {to}"))
}

/// Cloneable handle to a live session. Held by the registry, gateways,
/// queues, and media drivers.
#[derive(Clone)]
pub struct SessionHandle {
    login: Arc<str>,
    id: Arc<str>,
    security: SecurityLevel,
    tx: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("login", &self.login).finish()
    }
}

impl SessionHandle {
    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn security(&self) -> SecurityLevel {
        self.security
    }

    /// Subscribe to the session's event stream, in emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Resolves when the session actor has ended.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether two handles point at the same session instance.
    pub(crate) fn same_session(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    async fn request(
        &self,
        make: impl FnOnce(OpReply) -> SessionCommand,
    ) -> Result<Outcome, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).await.map_err(|_| session_gone())?;
        rx.await.map_err(|_| session_gone())?
    }

    pub async fn set_state(
        &self,
        target: StateName,
        reason: Option<ReleaseReason>,
    ) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::SetState { target, reason, reply }).await
    }

    pub async fn set_endpoint(&self, endpoint: String) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::SetEndpoint { endpoint, reply }).await
    }

    pub async fn change_profile(&self, profile: String) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::ChangeProfile { profile, reply }).await
    }

    pub async fn dial(&self, number: String) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::Dial { number, reply }).await
    }

    pub async fn agent_transfer(
        &self,
        target: String,
        case_id: Option<String>,
    ) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::AgentTransfer { target, case_id, reply }).await
    }

    pub async fn queue_transfer(
        &self,
        queue: String,
        vars: Value,
        skills: Vec<Skill>,
    ) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::QueueTransfer { queue, vars, skills, reply }).await
    }

    pub async fn warm_transfer(&self, destination: String) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::WarmTransfer { destination, reply }).await
    }

    pub async fn warm_transfer_complete(&self) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::WarmTransferComplete { reply }).await
    }

    pub async fn warm_transfer_cancel(&self) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::WarmTransferCancel { reply }).await
    }

    pub async fn media_command(
        &self,
        name: String,
        mode: MediaCommandMode,
        args: Vec<Value>,
    ) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::MediaCommand { name, mode, args, reply }).await
    }

    pub async fn media_hangup(&self) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::MediaHangup { reply }).await
    }

    pub async fn init_outbound(
        &self,
        client: String,
        media_type: MediaType,
    ) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::InitOutbound { client, media_type, reply }).await
    }

    /// Queue-facing: offer a call to this agent.
    pub async fn ring(&self, call: Call) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::Ring { call, reply }).await
    }

    pub async fn spy(&self, target: String) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::Spy { target, reply }).await
    }

    pub(crate) async fn tap(
        &self,
        spy_login: String,
        spy_endpoint: Option<String>,
    ) -> Result<Outcome, ApiError> {
        self.request(|reply| SessionCommand::Tap { spy_login, spy_endpoint, reply }).await
    }

    /// Deliver a supervisor broadcast.
    pub async fn blab(&self, text: String) {
        let _ = self.tx.send(SessionCommand::Blab { text }).await;
    }

    pub(crate) async fn supervisor_tab(&self, action: TabAction, id: String, profile: String) {
        let _ = self.tx.send(SessionCommand::SupervisorTab { action, id, profile }).await;
    }

    /// Driver-facing: push an asynchronous media notice.
    pub async fn media_notice(&self, notice: MediaNotice) {
        let _ = self.tx.send(SessionCommand::Media(notice)).await;
    }

    /// Snapshot of the agent's observable state.
    pub async fn dump_state(&self) -> Result<AgentSnapshot, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::DumpState { reply: tx }).await.map_err(|_| session_gone())?;
        rx.await.map_err(|_| session_gone())
    }

    /// Orderly logout: releases any current call, then ends the session.
    pub async fn logout(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Logout { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Forced teardown (poll liveness, gateway crash, admin kick).
    pub async fn stop(&self, reason: StopReason) {
        let _ = self.tx.send(SessionCommand::Stop { reason }).await;
    }
}

/// Timing knobs for a session, taken from the server config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a call may ring before it is pulled back.
    pub ringout: Duration,
    /// Deadline for any single media call.
    pub media_timeout: Duration,
    /// Deadline for calls into the registry or peer sessions.
    pub peer_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ringout: Duration::from_secs(30),
            media_timeout: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(5),
        }
    }
}

/// Spawn a session actor. Returns the handle and the actor's join handle;
/// the registry uses the latter to observe session death.
pub(crate) fn spawn(
    spec: AgentSpec,
    cfg: SessionConfig,
    registry: Arc<AgentRegistry>,
    outbound: Option<Arc<dyn OutboundMediaFactory>>,
    shutdown: CancellationToken,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
    let handle = SessionHandle {
        login: Arc::from(spec.login.as_str()),
        id: Arc::from(spec.id.as_str()),
        security: spec.security,
        tx,
        events: events.clone(),
    };

    let session = Session {
        spec,
        state: AgentState::Idle,
        state_seq: 0,
        last_change_ms: now_epoch_ms(),
        queued_release: None,
        expect_spy_call: false,
        ring_deadline: None,
        cfg,
        registry,
        outbound,
        events,
        self_handle: handle.clone(),
        shutdown,
    };

    let task = tokio::spawn(session.run(rx));
    (handle, task)
}

struct Session {
    spec: AgentSpec,
    state: AgentState,
    state_seq: u64,
    last_change_ms: u64,
    /// Release recorded while a call was up; applied when the call ends.
    queued_release: Option<ReleaseReason>,
    /// Sentinel `expect`: the next offered call is a spy leg and is attached
    /// directly as oncall.
    expect_spy_call: bool,
    ring_deadline: Option<Instant>,
    cfg: SessionConfig,
    registry: Arc<AgentRegistry>,
    outbound: Option<Arc<dyn OutboundMediaFactory>>,
    events: broadcast::Sender<SessionEvent>,
    self_handle: SessionHandle,
    shutdown: CancellationToken,
}

impl Session {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        info!(agent = %self.spec.login, profile = %self.spec.profile, "agent session started");
        let shutdown = self.shutdown.clone();

        loop {
            let ring_deadline = self.ring_deadline;
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                _ = async {
                    match ring_deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if ring_deadline.is_some() => {
                    self.ring_expired().await;
                }

                _ = shutdown.cancelled() => {
                    self.release_media("system_shutdown").await;
                    break;
                }
            }
        }

        info!(agent = %self.spec.login, "agent session ended");
    }

    /// Handle one input to completion. Returns `true` when the session
    /// should terminate.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::SetState { target, reason, reply } => {
                let _ = reply.send(self.set_state(target, reason).await);
            }
            SessionCommand::SetEndpoint { endpoint, reply } => {
                let _ = reply.send(self.set_endpoint(endpoint));
            }
            SessionCommand::ChangeProfile { profile, reply } => {
                let _ = reply.send(self.change_profile(profile));
            }
            SessionCommand::Dial { number, reply } => {
                let _ = reply.send(self.dial(number).await);
            }
            SessionCommand::AgentTransfer { target, case_id, reply } => {
                let _ = reply.send(self.agent_transfer(target, case_id).await);
            }
            SessionCommand::QueueTransfer { queue, vars, skills, reply } => {
                let _ = reply.send(self.queue_transfer(queue, vars, skills).await);
            }
            SessionCommand::WarmTransfer { destination, reply } => {
                let _ = reply.send(self.warm_transfer(destination).await);
            }
            SessionCommand::WarmTransferComplete { reply } => {
                let _ = reply.send(self.warm_transfer_complete().await);
            }
            SessionCommand::WarmTransferCancel { reply } => {
                let _ = reply.send(self.warm_transfer_cancel().await);
            }
            SessionCommand::MediaCommand { name, mode, args, reply } => {
                let _ = reply.send(self.media_command(name, mode, args).await);
            }
            SessionCommand::MediaHangup { reply } => {
                let _ = reply.send(self.media_hangup().await);
            }
            SessionCommand::InitOutbound { client, media_type, reply } => {
                let _ = reply.send(self.init_outbound(client, media_type).await);
            }
            SessionCommand::Ring { call, reply } => {
                let _ = reply.send(self.ring(call).await);
            }
            SessionCommand::Spy { target, reply } => {
                let _ = reply.send(self.spy(target).await);
            }
            SessionCommand::Tap { spy_login, spy_endpoint, reply } => {
                let _ = reply.send(self.tap(spy_login, spy_endpoint).await);
            }
            SessionCommand::Blab { text } => {
                let _ = self.events.send(SessionEvent::Blab { text });
            }
            SessionCommand::SupervisorTab { action, id, profile } => {
                let _ = self.events.send(SessionEvent::SupervisorTab { action, id, profile });
            }
            SessionCommand::Media(notice) => self.media_notice(notice).await,
            SessionCommand::DumpState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Logout { reply } => {
                self.release_media("agent_logout").await;
                let _ = reply.send(());
                return true;
            }
            SessionCommand::Stop { reason } => {
                warn!(agent = %self.spec.login, reason = reason.as_str(), "session stopped");
                self.release_media(reason.as_str()).await;
                return true;
            }
        }
        false
    }

    // -- State machine --------------------------------------------------------

    /// Apply a transition: bump the sequence, stamp the change, broadcast.
    fn transition(&mut self, next: AgentState) {
        self.state_seq += 1;
        self.last_change_ms = now_epoch_ms();
        self.state = next;
        debug!(
            agent = %self.spec.login,
            state = %self.state.name(),
            seq = self.state_seq,
            "state changed"
        );
        let _ = self
            .events
            .send(SessionEvent::State { state: self.state.clone(), seq: self.state_seq });
    }

    async fn set_state(
        &mut self,
        target: StateName,
        reason: Option<ReleaseReason>,
    ) -> Result<Outcome, ApiError> {
        let from = self.state.name();
        if !fsm::client_settable(target) {
            return Err(invalid(from, target));
        }

        match target {
            StateName::Idle => match &self.state {
                AgentState::Released(_) => {
                    self.transition(AgentState::Idle);
                    Ok(Outcome::Accepted)
                }
                AgentState::Wrapup(_) => {
                    // Wrapup completion detaches the call. A release queued
                    // during the call takes precedence over idle.
                    match self.queued_release.take() {
                        Some(r) => self.transition(AgentState::Released(r)),
                        None => self.transition(AgentState::Idle),
                    }
                    Ok(Outcome::Accepted)
                }
                AgentState::Precall(c) => {
                    // Abandon the outbound call before it is dialed. A
                    // release stashed when the precall started takes
                    // precedence, as it does for wrapup completion.
                    let call = c.clone();
                    self.release_call(&call, "precall_abandoned").await;
                    match self.queued_release.take() {
                        Some(r) => self.transition(AgentState::Released(r)),
                        None => self.transition(AgentState::Idle),
                    }
                    Ok(Outcome::Accepted)
                }
                _ => Err(invalid(from, target)),
            },

            StateName::Released => {
                let reason = reason.unwrap_or(ReleaseReason::Default);
                match &self.state {
                    AgentState::Idle | AgentState::Released(_) | AgentState::Wrapup(_) => {
                        self.transition(AgentState::Released(reason));
                        Ok(Outcome::Accepted)
                    }
                    AgentState::Ringing(_)
                    | AgentState::Oncall(_)
                    | AgentState::Outgoing(_)
                    | AgentState::WarmTransfer { .. } => {
                        self.queued_release = Some(reason);
                        Ok(Outcome::Queued)
                    }
                    AgentState::Precall(c) => {
                        // The explicit reason replaces any release stashed
                        // when the precall started.
                        let call = c.clone();
                        self.release_call(&call, "precall_abandoned").await;
                        self.queued_release = None;
                        self.transition(AgentState::Released(reason));
                        Ok(Outcome::Accepted)
                    }
                }
            }

            StateName::Oncall => match &self.state {
                AgentState::Ringing(c) => {
                    let call = c.clone();
                    self.media_call(call.source.pickup()).await?;
                    self.ring_deadline = None;
                    let media = call.media_type;
                    self.transition(AgentState::Oncall(call));
                    if media != MediaType::Voice {
                        let _ = self.events.send(SessionEvent::MediaLoad {
                            media,
                            fullpane: media == MediaType::Email,
                        });
                    }
                    Ok(Outcome::Accepted)
                }
                AgentState::Outgoing(c) => {
                    let call = c.clone();
                    self.transition(AgentState::Oncall(call));
                    Ok(Outcome::Accepted)
                }
                _ => Err(invalid(from, target)),
            },

            _ => Err(invalid(from, target)),
        }
    }

    fn set_endpoint(&mut self, endpoint: String) -> Result<Outcome, ApiError> {
        match self.state {
            AgentState::Idle | AgentState::Released(_) => {
                self.spec.endpoint = Some(endpoint);
                Ok(Outcome::Accepted)
            }
            _ => Err(ErrorCode::InvalidStateChange
                .err("endpoint can only change while idle or released")),
        }
    }

    fn change_profile(&mut self, profile: String) -> Result<Outcome, ApiError> {
        self.spec.profile = profile.clone();
        let _ = self.events.send(SessionEvent::Profile { profile });
        Ok(Outcome::Accepted)
    }

    async fn dial(&mut self, number: String) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::Precall(c) if c.direction == crate::media::CallDirection::Outbound => {
                c.clone()
            }
            _ => return Err(invalid(self.state.name(), StateName::Outgoing)),
        };
        self.media_call(call.source.dial(&number)).await?;
        self.transition(AgentState::Outgoing(call));
        Ok(Outcome::Accepted)
    }

    async fn agent_transfer(
        &mut self,
        target: String,
        case_id: Option<String>,
    ) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::Oncall(c) => c.clone(),
            _ => return Err(invalid(self.state.name(), StateName::Wrapup)),
        };

        let peer = self
            .registry
            .query(&target)
            .await
            .map_err(|e| ErrorCode::UnknownError.err(e.to_string()))?
            .ok_or_else(|| ErrorCode::AgentNoexists.err(format!("no agent {target}")))?;

        let snapshot = self.peer_call(peer.dump_state()).await??;
        if !matches!(snapshot.state.name(), StateName::Idle | StateName::Released) {
            return Err(ErrorCode::InvalidStateChange
                .err(format!("{target} is {}", snapshot.state.name())));
        }

        self.media_call(call.source.agent_transfer(&peer, case_id.as_deref())).await?;
        self.transition(AgentState::Wrapup(call));
        Ok(Outcome::Accepted)
    }

    async fn queue_transfer(
        &mut self,
        queue: String,
        vars: Value,
        skills: Vec<Skill>,
    ) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::Oncall(c) => c.clone(),
            _ => return Err(invalid(self.state.name(), StateName::Wrapup)),
        };
        self.media_call(call.source.queue_transfer(&queue, &vars, &skills)).await?;
        self.transition(AgentState::Wrapup(call));
        Ok(Outcome::Accepted)
    }

    async fn warm_transfer(&mut self, destination: String) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::Oncall(c) => c.clone(),
            _ => return Err(invalid(self.state.name(), StateName::WarmTransfer)),
        };
        self.media_call(call.source.warm_transfer(&destination)).await?;
        self.transition(AgentState::WarmTransfer { onhold: call, calling: destination });
        Ok(Outcome::Accepted)
    }

    async fn warm_transfer_complete(&mut self) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::WarmTransfer { onhold, .. } => onhold.clone(),
            _ => return Err(invalid(self.state.name(), StateName::Wrapup)),
        };
        self.media_call(call.source.warm_transfer_complete()).await?;
        self.transition(AgentState::Wrapup(call));
        Ok(Outcome::Accepted)
    }

    async fn warm_transfer_cancel(&mut self) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::WarmTransfer { onhold, .. } => onhold.clone(),
            _ => return Err(invalid(self.state.name(), StateName::Oncall)),
        };
        self.media_call(call.source.warm_transfer_cancel()).await?;
        self.transition(AgentState::Oncall(call));
        Ok(Outcome::Accepted)
    }

    async fn media_command(
        &mut self,
        name: String,
        mode: MediaCommandMode,
        args: Vec<Value>,
    ) -> Result<Outcome, ApiError> {
        let call = self
            .state
            .call()
            .cloned()
            .ok_or_else(|| ErrorCode::MediaNoexists.err("no media attached"))?;

        match mode {
            MediaCommandMode::Call => {
                let result = self.media_call(call.source.command(&name, &args)).await?;
                Ok(Outcome::Value(result))
            }
            MediaCommandMode::Cast => {
                tokio::spawn(async move {
                    call.source.cast(&name, &args).await;
                });
                Ok(Outcome::Accepted)
            }
        }
    }

    /// Terminate whatever media is attached. Connected calls move to
    /// wrapup; a leg that never connected (ringing, precall) goes back to
    /// availability instead, since wrapup is not reachable from there.
    async fn media_hangup(&mut self) -> Result<Outcome, ApiError> {
        let call = self
            .state
            .call()
            .cloned()
            .ok_or_else(|| ErrorCode::MediaNoexists.err("no media attached"))?;
        self.media_call(call.source.hangup("agent_request")).await?;
        self.media_ended(false);
        Ok(Outcome::Accepted)
    }

    async fn init_outbound(
        &mut self,
        client: String,
        media_type: MediaType,
    ) -> Result<Outcome, ApiError> {
        match &self.state {
            AgentState::Idle => {}
            AgentState::Released(r) => {
                // Come back to this release once the outbound call wraps up.
                self.queued_release = Some(r.clone());
            }
            _ => return Err(invalid(self.state.name(), StateName::Precall)),
        }

        let factory = self
            .outbound
            .clone()
            .ok_or_else(|| ErrorCode::MediaNoexists.err("no outbound media configured"))?;
        let call = self
            .media_call(factory.create(&client, media_type, self.self_handle.clone()))
            .await?;
        self.transition(AgentState::Precall(call));
        Ok(Outcome::Accepted)
    }

    async fn ring(&mut self, call: Call) -> Result<Outcome, ApiError> {
        if self.expect_spy_call {
            // Spy leg promised by a prior `spy`: attach directly.
            self.expect_spy_call = false;
            self.transition(AgentState::Oncall(call));
            return Ok(Outcome::Accepted);
        }

        // A call arriving during wrapup (or any non-idle state) is rejected
        // until the agent is available again.
        if self.state.name() != StateName::Idle {
            return Err(invalid(self.state.name(), StateName::Ringing));
        }

        self.ring_deadline = Some(Instant::now() + self.cfg.ringout);
        self.transition(AgentState::Ringing(call));
        Ok(Outcome::Accepted)
    }

    /// Ring timer fired: pull the offer back and return to availability.
    async fn ring_expired(&mut self) {
        self.ring_deadline = None;
        let call = match &self.state {
            AgentState::Ringing(c) => c.clone(),
            _ => return,
        };
        debug!(agent = %self.spec.login, call = %call.id, "ring timed out");
        if let Err(e) = self.media_call(call.source.unring()).await {
            warn!(agent = %self.spec.login, call = %call.id, err = %e, "unring failed");
        }
        match self.queued_release.take() {
            Some(r) => self.transition(AgentState::Released(r)),
            None => self.transition(AgentState::Idle),
        }
    }

    async fn spy(&mut self, target: String) -> Result<Outcome, ApiError> {
        if !self.spec.security.is_supervisor() {
            return Err(ErrorCode::BadRequest.err("spy requires supervisor privilege"));
        }
        if !matches!(self.state, AgentState::Idle | AgentState::Released(_)) {
            return Err(invalid(self.state.name(), StateName::Oncall));
        }
        if target == self.spec.login {
            return Err(ErrorCode::BadRequest.err("cannot spy on yourself"));
        }

        let peer = self
            .registry
            .query(&target)
            .await
            .map_err(|e| ErrorCode::UnknownError.err(e.to_string()))?
            .ok_or_else(|| ErrorCode::AgentNoexists.err(format!("no agent {target}")))?;

        self.peer_call(peer.tap(self.spec.login.clone(), self.spec.endpoint.clone())).await??;
        self.expect_spy_call = true;
        Ok(Outcome::Accepted)
    }

    async fn tap(
        &mut self,
        spy_login: String,
        spy_endpoint: Option<String>,
    ) -> Result<Outcome, ApiError> {
        let call = match &self.state {
            AgentState::Oncall(c) => c.clone(),
            _ => {
                return Err(ErrorCode::InvalidStateChange
                    .err(format!("{} is not oncall", self.spec.login)))
            }
        };
        self.media_call(call.source.spy(&spy_login, spy_endpoint.as_deref())).await?;
        Ok(Outcome::Accepted)
    }

    // -- Media notices --------------------------------------------------------

    async fn media_notice(&mut self, notice: MediaNotice) {
        match notice {
            MediaNotice::Event(body) => {
                if let Some(call) = self.state.call() {
                    let _ = self
                        .events
                        .send(SessionEvent::MediaEvent { media: call.media_type, body });
                }
            }
            MediaNotice::UrlPop { url, name } => {
                let _ = self.events.send(SessionEvent::UrlPop { url, name });
            }
            MediaNotice::Hangup => self.media_ended(false),
            MediaNotice::Died => self.media_ended(true),
        }
    }

    /// The media ended underneath us. Move to wrapup if possible, otherwise
    /// back to availability.
    fn media_ended(&mut self, died: bool) {
        if died {
            warn!(
                agent = %self.spec.login,
                call = ?self.state.call().map(|c| c.id.clone()),
                "media died while attached"
            );
        }
        match &self.state {
            AgentState::Oncall(c) | AgentState::Outgoing(c) => {
                let call = c.clone();
                self.transition(AgentState::Wrapup(call));
            }
            AgentState::WarmTransfer { onhold, .. } => {
                let call = onhold.clone();
                self.transition(AgentState::Wrapup(call));
            }
            AgentState::Ringing(_) | AgentState::Precall(_) => {
                self.ring_deadline = None;
                match self.queued_release.take() {
                    Some(r) => self.transition(AgentState::Released(r)),
                    None => self.transition(AgentState::Idle),
                }
            }
            AgentState::Wrapup(_) | AgentState::Idle | AgentState::Released(_) => {}
        }
    }

    // -- Helpers --------------------------------------------------------------

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            login: self.spec.login.clone(),
            id: self.spec.id.clone(),
            profile: self.spec.profile.clone(),
            security: self.spec.security,
            skills: self.spec.skills.clone(),
            endpoint: self.spec.endpoint.clone(),
            state: self.state.clone(),
            last_change_ms: self.last_change_ms,
        }
    }

    /// Hang up any attached media on the way out. Best effort; the session
    /// is terminating regardless.
    async fn release_media(&mut self, reason: &str) {
        if let Some(call) = self.state.call().cloned() {
            self.release_call(&call, reason).await;
        }
    }

    /// Best-effort hangup of one call.
    async fn release_call(&self, call: &Call, reason: &str) {
        if let Err(e) = self.media_call(call.source.hangup(reason)).await {
            warn!(agent = %self.spec.login, call = %call.id, err = %e, "hangup failed");
        }
    }

    /// Run a media call under the media deadline.
    async fn media_call<T>(
        &self,
        fut: impl std::future::Future<Output = MediaResult<T>>,
    ) -> Result<T, ApiError> {
        match tokio::time::timeout(self.cfg.media_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e.to_api()),
            Err(_) => Err(ErrorCode::UnknownError.err("media call timed out")),
        }
    }

    /// Run a peer-session call under the peer deadline.
    async fn peer_call<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, ApiError> {
        tokio::time::timeout(self.cfg.peer_timeout, fut)
            .await
            .map_err(|_| ErrorCode::UnknownError.err("peer session timed out"))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
