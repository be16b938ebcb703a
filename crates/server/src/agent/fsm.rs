// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transition-validity table and request parsing helpers.
//!
//! Extracted from the session actor so the table is independently testable.
//! `transition_allowed` covers every edge the session may take, including
//! internal ones (ring timeout, media death); `client_settable` restricts
//! which targets `set_state` accepts from the web client — the richer states
//! are reachable only through their dedicated operations.

use serde_json::Value;

use crate::agent::{ReleaseReason, StateName};
use crate::error::{ApiError, ErrorCode};

/// Whether the state machine may move from `from` to `to`.
pub fn transition_allowed(from: StateName, to: StateName) -> bool {
    use StateName::*;
    match from {
        Idle => matches!(to, Released | Ringing | Precall),
        Released => matches!(to, Idle | Released | Precall),
        Ringing => matches!(to, Oncall | Idle | Released),
        Precall => matches!(to, Outgoing | Idle | Released),
        Outgoing => matches!(to, Oncall | Wrapup),
        Oncall => matches!(to, Wrapup | WarmTransfer | Oncall | Released),
        WarmTransfer => matches!(to, Oncall | Wrapup),
        Wrapup => matches!(to, Idle | Released),
    }
}

/// Targets the web client may name in `set_state`. Everything else goes
/// through a dedicated operation (`dial`, `media_hangup`, transfers, ...).
pub fn client_settable(to: StateName) -> bool {
    matches!(to, StateName::Idle | StateName::Released | StateName::Oncall)
}

/// Parse the optional `set_state` release payload.
///
/// Accepted forms: absent or `"Default"`/`"default"` for the sentinel, the
/// legacy colon form `"id:label:bias"`, or an object
/// `{"id": ..., "label": ..., "bias": ...}`.
pub fn parse_release_reason(data: Option<&Value>) -> Result<ReleaseReason, ApiError> {
    let Some(data) = data else {
        return Ok(ReleaseReason::Default);
    };

    match data {
        Value::String(s) if s.eq_ignore_ascii_case("default") => Ok(ReleaseReason::Default),
        Value::String(s) => parse_colon_reason(s),
        Value::Object(obj) => {
            let id = obj.get("id").and_then(Value::as_str);
            let label = obj.get("label").and_then(Value::as_str);
            let bias = obj.get("bias").and_then(Value::as_i64);
            match (id, label, bias) {
                (Some(id), Some(label), Some(bias)) => {
                    custom_reason(id.to_owned(), label.to_owned(), bias)
                }
                _ => Err(ErrorCode::BadRequest.err("release reason needs id, label, bias")),
            }
        }
        _ => Err(ErrorCode::BadRequest.err("malformed release reason")),
    }
}

fn parse_colon_reason(s: &str) -> Result<ReleaseReason, ApiError> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(label), Some(bias)) => {
            let bias = bias
                .parse::<i64>()
                .map_err(|_| ErrorCode::BadRequest.err("release bias must be an integer"))?;
            custom_reason(id.to_owned(), label.to_owned(), bias)
        }
        _ => Err(ErrorCode::BadRequest.err("release reason must be \"id:label:bias\"")),
    }
}

fn custom_reason(id: String, label: String, bias: i64) -> Result<ReleaseReason, ApiError> {
    if !(-1..=1).contains(&bias) {
        return Err(ErrorCode::BadRequest.err("release bias must be -1, 0, or 1"));
    }
    Ok(ReleaseReason::Custom { id, label, bias: bias as i8 })
}

#[cfg(test)]
#[path = "fsm_tests.rs"]
mod tests;
