// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events emitted by an agent session toward its web gateway.
//!
//! These are in-process types; the gateway owns the wire encoding (see
//! `gateway::event`). Emission order per session is delivery order.

use serde_json::Value;

use crate::agent::AgentState;
use crate::media::MediaType;

/// One session-emitted event. `seq` on state changes orders transitions for
/// observers that buffer or lag.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The state machine changed.
    State { state: AgentState, seq: u64 },
    /// The agent moved to a new profile.
    Profile { profile: String },
    /// Supervisor broadcast.
    Blab { text: String },
    /// A media driver asked the client to open a viewport.
    UrlPop { url: String, name: String },
    /// Instruct the client to fetch media-specific UI data.
    MediaLoad { media: MediaType, fullpane: bool },
    /// Asynchronous media-specific event.
    MediaEvent { media: MediaType, body: Value },
    /// Monitor tree mutation, delivered to supervisor sessions only.
    SupervisorTab { action: TabAction, id: String, profile: String },
}

/// Whether a monitor tree entry is being added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabAction {
    Set,
    Drop,
}

impl TabAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Drop => "drop",
        }
    }
}
