// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent directory contract and the file-backed implementation.
//!
//! The real directory is an external collaborator; the session core only
//! needs "do these credentials name an agent, and what is their record".
//! [`FileAuthStore`] reads a JSON agents file at startup, which is enough
//! for single-node deployments and the test harness.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::agent::{AgentSpec, SecurityLevel, Skill};

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// External auth directory: credentials in, agent record out.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn authenticate(&self, login: &str, secret: &str) -> Option<AgentSpec>;
}

fn default_profile() -> String {
    "Default".to_owned()
}

fn default_security() -> SecurityLevel {
    SecurityLevel::Agent
}

/// One record of the agents file.
#[derive(Debug, Clone, Deserialize)]
struct AgentRecord {
    login: String,
    password: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_profile")]
    profile: String,
    #[serde(default = "default_security")]
    security: SecurityLevel,
    #[serde(default)]
    skills: Vec<Skill>,
    #[serde(default)]
    endpoint: Option<String>,
}

/// Directory loaded from a JSON array of agent records.
pub struct FileAuthStore {
    agents: HashMap<String, AgentRecord>,
}

impl FileAuthStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read agents file {}: {e}", path.display()))?;
        let records: Vec<AgentRecord> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("malformed agents file {}: {e}", path.display()))?;
        let agents = records.into_iter().map(|r| (r.login.clone(), r)).collect();
        Ok(Self { agents })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[async_trait]
impl AuthStore for FileAuthStore {
    async fn authenticate(&self, login: &str, secret: &str) -> Option<AgentSpec> {
        let record = self.agents.get(login)?;
        if !constant_time_eq(&record.password, secret) {
            return None;
        }
        Some(AgentSpec {
            login: record.login.clone(),
            id: record.id.clone().unwrap_or_else(|| record.login.clone()),
            profile: record.profile.clone(),
            security: record.security,
            skills: record.skills.clone(),
            endpoint: record.endpoint.clone(),
        })
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
