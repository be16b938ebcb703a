// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `/api` request form and its dispatch table.
//!
//! A request is `{"function": name, "args": [...]}` against a fixed
//! function set. Name, arity, and argument shape are validated here so
//! malformed requests never reach the session actor.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::fsm;
use crate::agent::session::{Outcome, SessionHandle};
use crate::agent::{AgentSnapshot, Skill, StateName};
use crate::error::{ApiError, ApiResponse, ErrorCode};
use crate::gateway::event::state_data;
use crate::media::{MediaCommandMode, MediaType};
use crate::registry::{AgentRegistry, BlabTarget};

/// One `/api` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Envelope plus the HTTP status it rides on. The envelope is
/// authoritative; the status only departs from 200 for privilege failures.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: ApiResponse,
}

impl ApiReply {
    pub fn ok(body: ApiResponse) -> Self {
        Self { status: StatusCode::OK, body }
    }

    fn forbidden(message: &str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: ApiResponse::error(ErrorCode::BadRequest, message),
        }
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

struct FunctionSpec {
    name: &'static str,
    min_args: usize,
    max_args: usize,
    supervisor_only: bool,
}

const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "set_state", min_args: 1, max_args: 2, supervisor_only: false },
    FunctionSpec { name: "set_endpoint", min_args: 1, max_args: 1, supervisor_only: false },
    FunctionSpec { name: "change_profile", min_args: 1, max_args: 1, supervisor_only: false },
    FunctionSpec { name: "dial", min_args: 1, max_args: 1, supervisor_only: false },
    FunctionSpec { name: "agent_transfer", min_args: 1, max_args: 2, supervisor_only: false },
    FunctionSpec { name: "queue_transfer", min_args: 1, max_args: 3, supervisor_only: false },
    FunctionSpec { name: "warm_transfer", min_args: 1, max_args: 1, supervisor_only: false },
    FunctionSpec { name: "warm_transfer_complete", min_args: 0, max_args: 0, supervisor_only: false },
    FunctionSpec { name: "warm_transfer_cancel", min_args: 0, max_args: 0, supervisor_only: false },
    FunctionSpec { name: "media_command", min_args: 2, max_args: 16, supervisor_only: false },
    FunctionSpec { name: "media_hangup", min_args: 0, max_args: 0, supervisor_only: false },
    FunctionSpec { name: "init_outbound", min_args: 2, max_args: 2, supervisor_only: false },
    FunctionSpec { name: "dump_state", min_args: 0, max_args: 0, supervisor_only: false },
    FunctionSpec { name: "list_agents", min_args: 0, max_args: 0, supervisor_only: true },
    FunctionSpec { name: "blab", min_args: 3, max_args: 3, supervisor_only: true },
    FunctionSpec { name: "spy", min_args: 1, max_args: 1, supervisor_only: true },
];

fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Validate and execute one request against the caller's session.
pub async fn dispatch(
    handle: &SessionHandle,
    registry: &Arc<AgentRegistry>,
    req: ApiRequest,
) -> ApiReply {
    let Some(spec) = lookup(&req.function) else {
        return ApiReply::ok(ApiResponse::error(
            ErrorCode::BadRequest,
            format!("unknown function {}", req.function),
        ));
    };

    if req.args.len() < spec.min_args || req.args.len() > spec.max_args {
        return ApiReply::ok(ApiResponse::error(
            ErrorCode::BadRequest,
            format!("{} takes {}..{} args", spec.name, spec.min_args, spec.max_args),
        ));
    }

    if spec.supervisor_only && !handle.security().is_supervisor() {
        return ApiReply::forbidden("insufficient privilege");
    }

    match run(handle, registry, &req).await {
        Ok(resp) => ApiReply::ok(resp),
        Err(e) => ApiReply::ok(e.into()),
    }
}

async fn run(
    handle: &SessionHandle,
    registry: &Arc<AgentRegistry>,
    req: &ApiRequest,
) -> Result<ApiResponse, ApiError> {
    let args = &req.args;
    let outcome = match req.function.as_str() {
        "set_state" => {
            let name = str_arg(args, 0, "state")?;
            let target = StateName::parse(name)
                .ok_or_else(|| ErrorCode::BadRequest.err(format!("unknown state {name}")))?;
            let reason = match target {
                StateName::Released => Some(fsm::parse_release_reason(args.get(1))?),
                _ => None,
            };
            handle.set_state(target, reason).await?
        }
        "set_endpoint" => handle.set_endpoint(str_arg(args, 0, "endpoint")?.to_owned()).await?,
        "change_profile" => handle.change_profile(str_arg(args, 0, "profile")?.to_owned()).await?,
        "dial" => handle.dial(str_arg(args, 0, "number")?.to_owned()).await?,
        "agent_transfer" => {
            let target = str_arg(args, 0, "target")?.to_owned();
            let case_id = opt_str_arg(args, 1, "case_id")?.map(str::to_owned);
            handle.agent_transfer(target, case_id).await?
        }
        "queue_transfer" => {
            let queue = str_arg(args, 0, "queue")?.to_owned();
            let vars = args.get(1).cloned().unwrap_or_else(|| json!({}));
            let skills = match args.get(2) {
                Some(v) => serde_json::from_value::<Vec<Skill>>(v.clone())
                    .map_err(|_| ErrorCode::BadRequest.err("malformed skills"))?,
                None => Vec::new(),
            };
            handle.queue_transfer(queue, vars, skills).await?
        }
        "warm_transfer" => handle.warm_transfer(str_arg(args, 0, "destination")?.to_owned()).await?,
        "warm_transfer_complete" => handle.warm_transfer_complete().await?,
        "warm_transfer_cancel" => handle.warm_transfer_cancel().await?,
        "media_command" => {
            let name = str_arg(args, 0, "command")?.to_owned();
            let mode = str_arg(args, 1, "mode")?;
            let mode = MediaCommandMode::parse(mode)
                .ok_or_else(|| ErrorCode::BadRequest.err(format!("unknown mode {mode}")))?;
            handle.media_command(name, mode, args[2..].to_vec()).await?
        }
        "media_hangup" => handle.media_hangup().await?,
        "init_outbound" => {
            let client = str_arg(args, 0, "client")?.to_owned();
            let type_name = str_arg(args, 1, "type")?;
            let media_type = MediaType::parse(type_name).ok_or_else(|| {
                ErrorCode::MediaNoexists.err(format!("unknown media type {type_name}"))
            })?;
            handle.init_outbound(client, media_type).await?
        }
        "dump_state" => {
            let snapshot = handle.dump_state().await?;
            Outcome::Value(snapshot_json(&snapshot))
        }
        "list_agents" => Outcome::Value(list_agents(registry).await),
        "blab" => {
            let text = str_arg(args, 0, "text")?.to_owned();
            let kind = str_arg(args, 1, "target kind")?;
            let value = str_arg(args, 2, "target")?.to_owned();
            let target = match kind {
                "all" => BlabTarget::All,
                "agent" => BlabTarget::Agent(value),
                "profile" => BlabTarget::Profile(value),
                "node" => BlabTarget::Node(value),
                _ => return Err(ErrorCode::BadRequest.err(format!("unknown target {kind}"))),
            };
            registry.blab(target, &text).await;
            Outcome::Accepted
        }
        "spy" => handle.spy(str_arg(args, 0, "target")?.to_owned()).await?,
        // Unreachable: lookup() restricts to the table above.
        other => return Err(ErrorCode::BadRequest.err(format!("unknown function {other}"))),
    };

    Ok(match outcome {
        Outcome::Accepted => ApiResponse::ok(),
        Outcome::Queued => ApiResponse::value(json!("queued")),
        Outcome::Value(v) => ApiResponse::value(v),
    })
}

async fn list_agents(registry: &Arc<AgentRegistry>) -> Value {
    let mut rows = Vec::new();
    for row in registry.list().await {
        // A session can die between listing and snapshotting; skip it.
        let Ok(snap) = row.handle.dump_state().await else { continue };
        rows.push(json!({
            "login": row.login,
            "profile": snap.profile,
            "state": snap.state.name().as_str(),
            "skills": row.skills,
            "since": row.since_ms,
        }));
    }
    Value::Array(rows)
}

fn snapshot_json(snapshot: &AgentSnapshot) -> Value {
    let mut obj = json!({
        "login": snapshot.login,
        "id": snapshot.id,
        "profile": snapshot.profile,
        "security": snapshot.security.as_str(),
        "skills": snapshot.skills,
        "endpoint": snapshot.endpoint,
        "state": snapshot.state.name().as_str(),
        "last_change": snapshot.last_change_ms,
    });
    if let (Some(data), Some(map)) = (state_data(&snapshot.state), obj.as_object_mut()) {
        map.insert("statedata".to_owned(), data);
    }
    obj
}

fn str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, ApiError> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| ErrorCode::BadRequest.err(format!("{name} must be a string")))
}

fn opt_str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<Option<&'a str>, ApiError> {
    match args.get(idx) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| ErrorCode::BadRequest.err(format!("{name} must be a string"))),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
