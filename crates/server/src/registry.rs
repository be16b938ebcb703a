// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster directory mapping `agent login -> live session`.
//!
//! This is the single-node implementation: a mutex-guarded map behind the
//! thin query/register/unregister/list/blab interface, so a consensus-backed
//! directory can replace it without touching callers. Mutations are
//! serialized per login by the write lock; session death is observed by a
//! monitor task and the entry is removed atomically.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::session::{self, SessionConfig, SessionHandle};
use crate::agent::{AgentSpec, Skill};
use crate::event::TabAction;
use crate::media::OutboundMediaFactory;

/// Registry failures. `Unavailable` maps to the client-visible
/// `cluster_unavailable` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Unavailable,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("cluster_unavailable"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Result of `start_agent`: a fresh session, or the live one that already
/// holds the login.
#[derive(Debug)]
pub enum StartOutcome {
    Fresh(SessionHandle),
    Existing(SessionHandle),
}

/// Recipients of a blab broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlabTarget {
    All,
    Agent(String),
    Profile(String),
    /// Single-node deployment: every local session is on this node.
    Node(String),
}

struct Registered {
    handle: SessionHandle,
    skills: Vec<Skill>,
    since_ms: u64,
}

/// One row of `list()`.
#[derive(Debug, Clone)]
pub struct AgentRow {
    pub login: String,
    pub handle: SessionHandle,
    pub since_ms: u64,
    pub skills: Vec<Skill>,
}

/// The directory. Owns session spawning so that insertion and monitor
/// wiring happen under one lock.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Registered>>,
    session_cfg: SessionConfig,
    outbound: Option<Arc<dyn OutboundMediaFactory>>,
    shutdown: CancellationToken,
}

impl AgentRegistry {
    pub fn new(
        session_cfg: SessionConfig,
        outbound: Option<Arc<dyn OutboundMediaFactory>>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self { agents: RwLock::new(HashMap::new()), session_cfg, outbound, shutdown })
    }

    /// Register `spec` and start its session, or return the live session
    /// already holding the login. Linearizable per login: when two callers
    /// race, one observes `Fresh` and the other `Existing`.
    pub async fn start_agent(self: &Arc<Self>, spec: AgentSpec) -> Result<StartOutcome, RegistryError> {
        let mut agents = self.agents.write().await;
        if let Some(existing) = agents.get(&spec.login) {
            if !existing.handle.is_closed() {
                return Ok(StartOutcome::Existing(existing.handle.clone()));
            }
            // Dead entry the monitor hasn't swept yet; replace it.
        }

        let login = spec.login.clone();
        let profile = spec.profile.clone();
        let skills = spec.skills.clone();
        let (handle, task) = session::spawn(
            spec,
            self.session_cfg.clone(),
            Arc::clone(self),
            self.outbound.clone(),
            self.shutdown.clone(),
        );
        agents.insert(
            login.clone(),
            Registered { handle: handle.clone(), skills, since_ms: session::now_epoch_ms() },
        );
        drop(agents);

        info!(agent = %login, "agent registered");
        self.notify_supervisors(TabAction::Set, &login, &profile).await;

        // Monitor: sweep the entry when the session actor ends.
        let registry = Arc::clone(self);
        let monitored = handle.clone();
        tokio::spawn(async move {
            let _ = task.await;
            registry.remove(&monitored).await;
        });

        Ok(StartOutcome::Fresh(handle))
    }

    /// Look up a live session. Never returns a dead handle.
    pub async fn query(&self, login: &str) -> Result<Option<SessionHandle>, RegistryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(login).map(|r| r.handle.clone()).filter(|h| !h.is_closed()))
    }

    /// Snapshot of all live sessions.
    pub async fn list(&self) -> Vec<AgentRow> {
        let agents = self.agents.read().await;
        agents
            .iter()
            .filter(|(_, r)| !r.handle.is_closed())
            .map(|(login, r)| AgentRow {
                login: login.clone(),
                handle: r.handle.clone(),
                since_ms: r.since_ms,
                skills: r.skills.clone(),
            })
            .collect()
    }

    /// Broadcast a supervisor message to every matching session.
    pub async fn blab(&self, target: BlabTarget, text: &str) {
        let handles: Vec<SessionHandle> = {
            let agents = self.agents.read().await;
            agents.values().map(|r| r.handle.clone()).collect()
        };

        for handle in handles {
            let matches = match &target {
                BlabTarget::All | BlabTarget::Node(_) => true,
                BlabTarget::Agent(login) => handle.login() == login,
                BlabTarget::Profile(profile) => match handle.dump_state().await {
                    Ok(snap) => &snap.profile == profile,
                    Err(_) => false,
                },
            };
            if matches {
                handle.blab(text.to_owned()).await;
            }
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        let agents = self.agents.read().await;
        agents.values().filter(|r| !r.handle.is_closed()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove a session's entry, keyed by channel identity (not just login)
    /// so a relogin that replaced the entry is left alone.
    async fn remove(&self, handle: &SessionHandle) {
        let removed = {
            let mut agents = self.agents.write().await;
            match agents.get(handle.login()) {
                Some(r) if r.handle.same_session(handle) => {
                    agents.remove(handle.login());
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(agent = handle.login(), "agent removed from registry");
            self.notify_supervisors(TabAction::Drop, handle.login(), "").await;
        }
    }

    /// Push a monitor-tree mutation to every supervisor session.
    async fn notify_supervisors(&self, action: TabAction, login: &str, profile: &str) {
        let handles: Vec<SessionHandle> = {
            let agents = self.agents.read().await;
            agents
                .values()
                .filter(|r| r.handle.security().is_supervisor())
                .map(|r| r.handle.clone())
                .collect()
        };
        for handle in handles {
            handle.supervisor_tab(action, login.to_owned(), profile.to_owned()).await;
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
