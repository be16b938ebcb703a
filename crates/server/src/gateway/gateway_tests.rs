// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use crate::agent::StateName;
use crate::test_support::{test_call, SessionBuilder, StubMediaDriver};

use super::api::ApiRequest;
use super::{spawn, GatewayConfig, GatewayHandle};

async fn gateway_for(login: &str) -> (GatewayHandle, crate::test_support::SessionCtx) {
    let ctx = SessionBuilder::new(login).spawn().await.unwrap();
    let (gw, _task) = spawn(ctx.handle.clone(), ctx.registry.clone(), GatewayConfig::default());
    (gw, ctx)
}

fn req(function: &str, args: serde_json::Value) -> ApiRequest {
    ApiRequest {
        function: function.to_owned(),
        args: args.as_array().cloned().unwrap_or_default(),
    }
}

/// Let the gateway actor absorb queued commands/events.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn poll_with_pending_events_drains_immediately() {
    let (gw, _ctx) = gateway_for("alice").await;

    let resp = gw.api(req("set_state", json!(["released", "Default"]))).await;
    assert!(resp.body.success);
    settle().await;

    let resp = gw.poll().await;
    assert!(resp.success);
    let events = resp.result.unwrap();
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["command"], "astate");
    assert_eq!(events[0]["state"], "released");
    assert_eq!(events[0]["statedata"]["reason"], "default");
}

#[tokio::test(start_paused = true)]
async fn flush_coalesces_events_into_one_batch() {
    let (gw, _ctx) = gateway_for("alice").await;

    // Register the waiter first, then emit two transitions back to back.
    let waiter = tokio::spawn({
        let gw = gw.clone();
        async move { gw.poll().await }
    });
    settle().await;

    gw.api(req("set_state", json!(["released"]))).await;
    gw.api(req("set_state", json!(["idle"]))).await;

    let resp = waiter.await.unwrap();
    assert!(resp.success);
    let events = resp.result.unwrap();
    let events = events.as_array().cloned().unwrap();
    assert_eq!(events.len(), 2, "both events in a single batch: {events:?}");
    assert_eq!(events[0]["state"], "released");
    assert_eq!(events[1]["state"], "idle");
}

#[tokio::test(start_paused = true)]
async fn newer_poll_replaces_the_older() {
    let (gw, _ctx) = gateway_for("alice").await;

    let first = tokio::spawn({
        let gw = gw.clone();
        async move { gw.poll().await }
    });
    settle().await;

    let second = tokio::spawn({
        let gw = gw.clone();
        async move { gw.poll().await }
    });
    settle().await;

    // The older poll terminates before the newer one registers.
    let resp = first.await.unwrap();
    assert!(!resp.success);
    assert_eq!(resp.errcode.as_deref(), Some("POLL_PID_REPLACED"));
    assert!(!second.is_finished());

    gw.api(req("set_state", json!(["released"]))).await;
    let resp = second.await.unwrap();
    assert!(resp.success);
}

#[tokio::test(start_paused = true)]
async fn idle_waiter_receives_a_pong() {
    let (gw, _ctx) = gateway_for("alice").await;

    let resp = gw.poll().await;
    assert!(resp.success, "expected a pong batch, got {resp:?}");
    let events = resp.result.unwrap();
    let events = events.as_array().cloned().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["command"], "pong");
    assert!(events[0]["timestamp"].is_number());
}

#[tokio::test(start_paused = true)]
async fn missed_polls_terminate_the_session() {
    let (_gw, ctx) = gateway_for("alice").await;

    // Never poll: the keep-alive sweep stops the session.
    tokio::time::timeout(Duration::from_secs(60), ctx.handle.closed())
        .await
        .unwrap_or_else(|_| panic!("session should have been terminated for missed polls"));
}

#[tokio::test(start_paused = true)]
async fn session_death_releases_the_waiter_with_a_final_envelope() {
    let (gw, ctx) = gateway_for("alice").await;

    let waiter = tokio::spawn({
        let gw = gw.clone();
        async move { gw.poll().await }
    });
    settle().await;

    ctx.handle.logout().await;

    let resp = waiter.await.unwrap();
    assert!(!resp.success);
    assert_eq!(resp.errcode.as_deref(), Some("AGENT_NOEXISTS"));
}

#[tokio::test(start_paused = true)]
async fn astate_payload_carries_call_details() {
    let (gw, ctx) = gateway_for("alice").await;
    let driver = StubMediaDriver::new();

    ctx.handle.ring(test_call("call_42", driver)).await.unwrap();
    settle().await;

    let resp = gw.poll().await;
    let events = resp.result.unwrap();
    let ev = &events.as_array().unwrap()[0];
    assert_eq!(ev["command"], "astate");
    assert_eq!(ev["state"], "ringing");
    assert_eq!(ev["statedata"]["callid"], "call_42");
    assert_eq!(ev["statedata"]["type"], "voice");
    assert_eq!(ev["statedata"]["brandname"], "Initech");
}

#[tokio::test(start_paused = true)]
async fn api_invalid_transition_emits_no_event() {
    let (gw, _ctx) = gateway_for("alice").await;

    let resp = gw.api(req("set_state", json!(["wrapup"]))).await;
    assert!(!resp.body.success);
    assert_eq!(resp.body.errcode.as_deref(), Some("INVALID_STATE_CHANGE"));
    settle().await;

    // Nothing buffered: the next poll waits for the pong instead.
    let resp = gw.poll().await;
    let events = resp.result.unwrap();
    assert_eq!(events.as_array().unwrap()[0]["command"], "pong");
}

#[tokio::test(start_paused = true)]
async fn set_state_released_while_oncall_returns_queued() {
    let (gw, ctx) = gateway_for("alice").await;
    let driver = StubMediaDriver::new();

    ctx.handle.ring(test_call("call_42", driver)).await.unwrap();
    ctx.handle.set_state(StateName::Oncall, None).await.unwrap();

    let resp = gw.api(req("set_state", json!(["released", "r1:Lunch:1"]))).await;
    assert!(resp.body.success);
    assert_eq!(resp.body.result, Some(json!("queued")));
}
