// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::session::SessionConfig;
use crate::gateway::GatewayConfig;
use crate::registry::AgentRegistry;
use crate::test_support::{agent_spec, supervisor_spec, test_call, StubAuthStore, StubMediaDriver};
use crate::transport::{build_router, ListenerState};

fn test_state() -> Arc<ListenerState> {
    let registry =
        AgentRegistry::new(SessionConfig::default(), None, CancellationToken::new());
    let auth = StubAuthStore::new()
        .with_agent(agent_spec("alice"), "s3cret")
        .with_agent(supervisor_spec("susan"), "hunter2");
    ListenerState::new(registry, Arc::new(auth), GatewayConfig::default())
}

fn server(state: Arc<ListenerState>) -> TestServer {
    TestServer::new(build_router(state)).unwrap()
}

fn session_cookie(resp: &TestResponse) -> HeaderValue {
    let set_cookie = resp.header(header::SET_COOKIE);
    let set_cookie = set_cookie.to_str().unwrap_or_default();
    let pair = set_cookie.split(';').next().unwrap_or_default();
    HeaderValue::from_str(pair).unwrap()
}

async fn login(server: &TestServer, user: &str, pass: &str) -> TestResponse {
    server.post("/login").form(&[("username", user), ("password", pass)]).await
}

async fn api(server: &TestServer, cookie: &HeaderValue, request: Value) -> TestResponse {
    server
        .post("/api")
        .add_header(header::COOKIE, cookie.clone())
        .form(&[("request", request.to_string().as_str())])
        .await
}

#[tokio::test(start_paused = true)]
async fn login_sets_cookie_and_returns_the_record() {
    let server = server(test_state());

    let resp = login(&server, "alice", "s3cret").await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["profile"], "Default");
    assert_eq!(body["result"]["security"], "agent");

    let cookie = session_cookie(&resp);
    assert!(cookie.to_str().unwrap().starts_with("cpx_id="));
}

#[tokio::test(start_paused = true)]
async fn bad_credentials_fail_in_the_envelope() {
    let server = server(test_state());

    let resp = login(&server, "alice", "wrong").await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], "BAD_REQUEST");
}

#[tokio::test(start_paused = true)]
async fn duplicate_login_aborts_and_leaves_the_session_alone() {
    let state = test_state();
    let server = server(state.clone());

    login(&server, "alice", "s3cret").await.assert_status(StatusCode::OK);
    let resp = login(&server, "alice", "s3cret").await;
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "already_logged_in");

    // The original session is untouched.
    assert!(state.registry.query("alice").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn api_without_a_session_cookie_is_rejected() {
    let server = server(test_state());

    let resp = server
        .post("/api")
        .form(&[("request", json!({ "function": "dump_state" }).to_string().as_str())])
        .await;
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], "BAD_REQUEST");
}

#[tokio::test(start_paused = true)]
async fn malformed_request_json_is_a_bad_request() {
    let server = server(test_state());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let resp = server
        .post("/api")
        .add_header(header::COOKIE, cookie)
        .form(&[("request", "{ not json")])
        .await;
    let body: Value = resp.json();
    assert_eq!(body["errcode"], "BAD_REQUEST");
}

#[tokio::test(start_paused = true)]
async fn set_state_then_poll_returns_the_astate_batch() {
    let server = server(test_state());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let resp =
        api(&server, &cookie, json!({ "function": "set_state", "args": ["released", "Default"] }))
            .await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);

    let resp = server.post("/poll").add_header(header::COOKIE, cookie).await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    let events = body["result"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["command"], "astate");
    assert_eq!(events[0]["state"], "released");
    assert_eq!(events[0]["statedata"]["reason"], "default");
}

#[tokio::test(start_paused = true)]
async fn queue_offer_reaches_the_poll_stream() {
    let state = test_state();
    let server = server(state.clone());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let handle = state.registry.query("alice").await.unwrap().unwrap();
    let driver = StubMediaDriver::new();
    handle.ring(test_call("call_42", driver)).await.unwrap();

    let resp = server.post("/poll").add_header(header::COOKIE, cookie).await;
    let body: Value = resp.json();
    let events = body["result"].as_array().unwrap();
    assert_eq!(events[0]["state"], "ringing");
    assert_eq!(events[0]["statedata"]["callid"], "call_42");
}

#[tokio::test(start_paused = true)]
async fn invalid_transition_returns_the_error_envelope() {
    let server = server(test_state());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let resp = api(&server, &cookie, json!({ "function": "set_state", "args": ["wrapup"] })).await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], "INVALID_STATE_CHANGE");
}

#[tokio::test(start_paused = true)]
async fn quiet_poll_returns_a_pong() {
    let server = server(test_state());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let resp = server.post("/poll").add_header(header::COOKIE, cookie).await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    let events = body["result"].as_array().unwrap();
    assert_eq!(events[0]["command"], "pong");
    assert!(events[0]["timestamp"].is_number());
}

#[tokio::test(start_paused = true)]
async fn newer_poll_displaces_the_older() {
    let server = server(test_state());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let first = server.post("/poll").add_header(header::COOKIE, cookie.clone());
    let second = async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        server.post("/poll").add_header(header::COOKIE, cookie.clone()).await
    };

    let (first, _second_pending) = tokio::join!(
        async {
            let resp = first.await;
            let body: Value = resp.json();
            body
        },
        async {
            // The second poll eventually returns a pong; we only care that
            // the first was displaced.
            let resp = second.await;
            let body: Value = resp.json();
            body
        }
    );

    assert_eq!(first["success"], false);
    assert_eq!(first["errcode"], "POLL_PID_REPLACED");
}

#[tokio::test(start_paused = true)]
async fn supervisor_functions_are_403_for_agents() {
    let server = server(test_state());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let resp = api(&server, &cookie, json!({ "function": "list_agents" })).await;
    resp.assert_status(StatusCode::FORBIDDEN);
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
}

#[tokio::test(start_paused = true)]
async fn supervisor_blab_reaches_the_agent_poll() {
    let server = server(test_state());
    let alice = session_cookie(&login(&server, "alice", "s3cret").await);
    let susan = session_cookie(&login(&server, "susan", "hunter2").await);

    let resp =
        api(&server, &susan, json!({ "function": "blab", "args": ["break time", "agent", "alice"] }))
            .await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);

    let resp = server.post("/poll").add_header(header::COOKIE, alice).await;
    let body: Value = resp.json();
    let events = body["result"].as_array().unwrap();
    assert!(events.iter().any(|e| e["command"] == "blab" && e["text"] == "break time"));
}

#[tokio::test(start_paused = true)]
async fn logout_kills_the_cookie_and_frees_the_login() {
    let state = test_state();
    let server = server(state.clone());
    let cookie = session_cookie(&login(&server, "alice", "s3cret").await);

    let resp = server.post("/logout").add_header(header::COOKIE, cookie.clone()).await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    let dead = resp.header(header::SET_COOKIE);
    assert!(dead.to_str().unwrap_or_default().starts_with("cpx_id=dead"));

    // The cookie no longer routes, and the login is free again.
    let resp = api(&server, &cookie, json!({ "function": "dump_state" })).await;
    let body: Value = resp.json();
    assert_eq!(body["success"], false);

    let resp = login(&server, "alice", "s3cret").await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
}

#[tokio::test(start_paused = true)]
async fn unknown_paths_are_404() {
    let server = server(test_state());
    let resp = server.post("/media/voicemail/42").await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn health_reports_session_count() {
    let state = test_state();
    let server = server(state.clone());

    login(&server, "alice", "s3cret").await.assert_status(StatusCode::OK);
    let resp = server.get("/api/v1/health").await;
    let body: Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["agents"], 1);
}
