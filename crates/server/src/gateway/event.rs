// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire encoding of session events for the long-poll stream.
//!
//! Every event is a JSON object keyed by `command`. The `statedata`
//! companion of `astate` is normative for client compatibility: calls carry
//! callerid/brandname/ringpath/mediapath/callid/type, releases carry the
//! reason (with the `default` sentinel preserved), warm transfers nest the
//! held and in-progress calls, and idle has no statedata at all.

use serde_json::{json, Map, Value};

use crate::agent::session::now_epoch_ms;
use crate::agent::{AgentState, ReleaseReason};
use crate::event::SessionEvent;
use crate::media::Call;

/// Encode a session event as its wire object.
pub fn encode(event: &SessionEvent) -> Value {
    match event {
        SessionEvent::State { state, .. } => {
            let mut obj = Map::new();
            obj.insert("command".to_owned(), json!("astate"));
            obj.insert("state".to_owned(), json!(state.name().as_str()));
            if let Some(data) = state_data(state) {
                obj.insert("statedata".to_owned(), data);
            }
            Value::Object(obj)
        }
        SessionEvent::Profile { profile } => {
            json!({ "command": "aprofile", "profile": profile })
        }
        SessionEvent::Blab { text } => {
            json!({ "command": "blab", "text": text })
        }
        SessionEvent::UrlPop { url, name } => {
            json!({ "command": "urlpop", "url": url, "name": name })
        }
        SessionEvent::MediaLoad { media, fullpane } => {
            json!({ "command": "mediaload", "media": media.as_str(), "fullpane": fullpane })
        }
        SessionEvent::MediaEvent { media, body } => {
            let mut obj = Map::new();
            obj.insert("command".to_owned(), json!("mediaevent"));
            obj.insert("media".to_owned(), json!(media.as_str()));
            if let Value::Object(extra) = body {
                for (k, v) in extra {
                    obj.entry(k.clone()).or_insert_with(|| v.clone());
                }
            } else {
                obj.insert("event".to_owned(), body.clone());
            }
            Value::Object(obj)
        }
        SessionEvent::SupervisorTab { action, id, profile } => {
            json!({
                "command": "supervisortab",
                "action": action.as_str(),
                "type": "agent",
                "id": id,
                "details": { "profile": profile },
            })
        }
    }
}

/// The liveness heartbeat, generated by the gateway itself.
pub fn pong() -> Value {
    json!({ "command": "pong", "timestamp": now_epoch_ms() })
}

/// Statedata for a state, or `None` when the state carries none.
pub fn state_data(state: &AgentState) -> Option<Value> {
    match state {
        AgentState::Idle => None,
        AgentState::Released(reason) => Some(json!({ "reason": reason_data(reason) })),
        AgentState::Ringing(c)
        | AgentState::Precall(c)
        | AgentState::Oncall(c)
        | AgentState::Outgoing(c)
        | AgentState::Wrapup(c) => Some(call_data(c)),
        AgentState::WarmTransfer { onhold, calling } => {
            Some(json!({ "onhold": call_data(onhold), "calling": calling }))
        }
    }
}

fn reason_data(reason: &ReleaseReason) -> Value {
    match reason {
        ReleaseReason::Default => json!("default"),
        ReleaseReason::Custom { id, label, bias } => {
            json!({ "id": id, "label": label, "bias": bias })
        }
    }
}

fn call_data(call: &Call) -> Value {
    let brandname =
        call.client.as_ref().map(|c| c.label.as_str()).unwrap_or("unknown client");
    json!({
        "callid": call.id,
        "type": call.media_type.as_str(),
        "callerid": format!("{} {}", call.callerid.0, call.callerid.1),
        "brandname": brandname,
        "ringpath": call.ring_path.as_str(),
        "mediapath": call.media_path.as_str(),
    })
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
