// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media records and the driver contract.
//!
//! A [`Call`] is created by an external media driver (voice bridge, mailer,
//! chat relay); the session holds a borrowed reference while it owns the
//! interaction. All media-side effects go through the [`MediaDriver`] trait
//! so the telephony layer stays out of this crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::session::SessionHandle;
use crate::agent::Skill;
use crate::error::{ApiError, ErrorCode};

/// Contact modality carried by a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Voice,
    Email,
    Chat,
    Voicemail,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Voicemail => "voicemail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(Self::Voice),
            "email" => Some(Self::Email),
            "chat" => Some(Self::Chat),
            "voicemail" => Some(Self::Voicemail),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Whether ringing (or media) is carried in-band through the platform or
/// out-of-band by the media layer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    Inband,
    Outband,
}

impl PathMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inband => "inband",
            Self::Outband => "outband",
        }
    }
}

/// The client (brand) a call belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub label: String,
}

/// A contact in flight. Single-owner at any instant; ownership moves with
/// transfers and ends at hangup or wrapup completion.
#[derive(Clone)]
pub struct Call {
    pub id: String,
    pub media_type: MediaType,
    /// Ownership handle to the media driver.
    pub source: Arc<dyn MediaDriver>,
    pub callerid: (String, String),
    pub client: Option<Client>,
    pub direction: CallDirection,
    pub ring_path: PathMode,
    pub media_path: PathMode,
    pub skills: Vec<Skill>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("direction", &self.direction)
            .finish()
    }
}

/// How a media command is delivered: `call` waits for the media's answer,
/// `cast` returns immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommandMode {
    Call,
    Cast,
}

impl MediaCommandMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(Self::Call),
            "cast" => Some(Self::Cast),
            _ => None,
        }
    }
}

/// Failures reported by a media driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The media rejected the command outright.
    Rejected(String),
    /// The referenced driver, leg, or outbound type does not exist.
    Noexists,
    /// The media failed for an unclassified reason.
    Failed(String),
}

impl MediaError {
    /// Map onto the client-visible error vocabulary.
    pub fn to_api(&self) -> ApiError {
        match self {
            Self::Rejected(msg) => ErrorCode::InvalidMediaCall.err(msg.clone()),
            Self::Noexists => ErrorCode::MediaNoexists.err("no such media"),
            Self::Failed(msg) => ErrorCode::UnknownError.err(msg.clone()),
        }
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "media rejected: {msg}"),
            Self::Noexists => f.write_str("no such media"),
            Self::Failed(msg) => write!(f, "media failed: {msg}"),
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Session-facing contract of a media driver. One instance per call.
///
/// Calls are bounded by the session's media timeout; a driver that blocks
/// past the deadline is treated as failed.
#[async_trait]
pub trait MediaDriver: Send + Sync {
    /// The agent answered the offered call.
    async fn pickup(&self) -> MediaResult<()>;

    /// Stop offering: ring timer fired or the offer was withdrawn.
    async fn unring(&self) -> MediaResult<()>;

    /// Terminate the media. `reason` is recorded by the driver.
    async fn hangup(&self, reason: &str) -> MediaResult<()>;

    /// Dial out from a precall session; the media advances to outgoing.
    async fn dial(&self, number: &str) -> MediaResult<()>;

    /// Media-specific command, `call` mode: returns the media's result.
    async fn command(&self, name: &str, args: &[Value]) -> MediaResult<Value>;

    /// Media-specific command, `cast` mode: fire and forget.
    async fn cast(&self, name: &str, args: &[Value]);

    /// Ring a peer agent, then detach from the current one on success.
    async fn agent_transfer(&self, target: &SessionHandle, case_id: Option<&str>)
        -> MediaResult<()>;

    /// Push vars/skills into the media and requeue it.
    async fn queue_transfer(&self, queue: &str, vars: &Value, skills: &[Skill]) -> MediaResult<()>;

    /// Start a third-party consult leg.
    async fn warm_transfer(&self, destination: &str) -> MediaResult<()>;

    /// Bridge the held party to the consult destination.
    async fn warm_transfer_complete(&self) -> MediaResult<()>;

    /// Drop the consult leg and resume the held party.
    async fn warm_transfer_cancel(&self) -> MediaResult<()>;

    /// Open a read-only leg toward a supervisor.
    async fn spy(&self, spy_login: &str, spy_endpoint: Option<&str>) -> MediaResult<()>;
}

/// Factory for agent-initiated outbound calls (`init_outbound`).
#[async_trait]
pub trait OutboundMediaFactory: Send + Sync {
    /// Create an outbound call for `client`, owned by `agent`. Returns
    /// [`MediaError::Noexists`] for unrecognized types.
    async fn create(
        &self,
        client: &str,
        media_type: MediaType,
        agent: SessionHandle,
    ) -> MediaResult<Call>;
}

/// Asynchronous notice pushed by a driver into its owning session.
#[derive(Debug, Clone)]
pub enum MediaNotice {
    /// Media-specific event, forwarded to the client as `mediaevent`.
    Event(Value),
    /// Ask the client to open a named viewport.
    UrlPop { url: String, name: String },
    /// The far side terminated the media.
    Hangup,
    /// The driver died while attached.
    Died,
}
