// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent data model: identity, skills, release reasons, and the state
//! machine's value type.
//!
//! The current call lives *inside* the state variant, so the invariant
//! "`current_call` is non-null iff the state is active" holds by
//! construction.

pub mod fsm;
pub mod session;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::Call;

/// Privilege tier of an agent account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Agent,
    Supervisor,
    Admin,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Supervisor => "supervisor",
            Self::Admin => "admin",
        }
    }

    /// Whether this level may call supervisor-only API functions.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, Self::Supervisor | Self::Admin)
    }
}

/// A capability token used by the matching engine: atomic, or a
/// parameterized `(atom, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skill {
    Atom(String),
    Expanded { atom: String, value: String },
}

impl Skill {
    pub fn atom(name: impl Into<String>) -> Self {
        Self::Atom(name.into())
    }
}

/// Why an agent is released. `Default` is the sentinel; an explicit reason
/// carries an id, a label, and a bias in {-1, 0, +1}.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    Default,
    Custom { id: String, label: String, bias: i8 },
}

impl ReleaseReason {
    pub fn label(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Custom { label, .. } => label,
        }
    }
}

/// Name of a state, without its payload. Used by the transition table and
/// the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateName {
    Idle,
    Ringing,
    Precall,
    Oncall,
    Outgoing,
    Wrapup,
    Released,
    WarmTransfer,
}

impl StateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing => "ringing",
            Self::Precall => "precall",
            Self::Oncall => "oncall",
            Self::Outgoing => "outgoing",
            Self::Wrapup => "wrapup",
            Self::Released => "released",
            Self::WarmTransfer => "warmtransfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "ringing" => Some(Self::Ringing),
            "precall" => Some(Self::Precall),
            "oncall" => Some(Self::Oncall),
            "outgoing" => Some(Self::Outgoing),
            "wrapup" => Some(Self::Wrapup),
            "released" => Some(Self::Released),
            "warmtransfer" => Some(Self::WarmTransfer),
            _ => None,
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The agent state machine's value. Active states carry the call record.
#[derive(Debug, Clone)]
pub enum AgentState {
    Idle,
    Ringing(Call),
    Precall(Call),
    Oncall(Call),
    Outgoing(Call),
    Wrapup(Call),
    Released(ReleaseReason),
    /// Consult-then-bridge transfer: the customer call is on hold while the
    /// agent talks to the consult destination.
    WarmTransfer { onhold: Call, calling: String },
}

impl AgentState {
    pub fn name(&self) -> StateName {
        match self {
            Self::Idle => StateName::Idle,
            Self::Ringing(_) => StateName::Ringing,
            Self::Precall(_) => StateName::Precall,
            Self::Oncall(_) => StateName::Oncall,
            Self::Outgoing(_) => StateName::Outgoing,
            Self::Wrapup(_) => StateName::Wrapup,
            Self::Released(_) => StateName::Released,
            Self::WarmTransfer { .. } => StateName::WarmTransfer,
        }
    }

    /// The attached call, if any. `Some` exactly for active states.
    pub fn call(&self) -> Option<&Call> {
        match self {
            Self::Ringing(c)
            | Self::Precall(c)
            | Self::Oncall(c)
            | Self::Outgoing(c)
            | Self::Wrapup(c) => Some(c),
            Self::WarmTransfer { onhold, .. } => Some(onhold),
            Self::Idle | Self::Released(_) => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.call().is_some()
    }
}

/// Directory record for an agent, as handed over by the auth store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub login: String,
    pub id: String,
    pub profile: String,
    pub security: SecurityLevel,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Point-in-time copy of a session's observable state. External readers get
/// snapshots, never handles to the live state.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub login: String,
    pub id: String,
    pub profile: String,
    pub security: SecurityLevel,
    pub skills: Vec<Skill>,
    pub endpoint: Option<String>,
    pub state: AgentState,
    pub last_change_ms: u64,
}
