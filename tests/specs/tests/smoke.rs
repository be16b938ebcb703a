// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `switchboard` binary and
//! exercise the login, `/api`, and `/poll` surfaces over HTTP.

use std::time::Duration;

use serde_json::{json, Value};

use switchboard::error::ErrorCode;
use switchboard_specs::{cookie_of, ServerProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn login(
    client: &reqwest::Client,
    base: &str,
    user: &str,
    pass: &str,
) -> anyhow::Result<(Value, String)> {
    let resp = client
        .post(format!("{base}/login"))
        .form(&[("username", user), ("password", pass)])
        .send()
        .await?;
    let cookie = cookie_of(&resp).unwrap_or_default();
    Ok((resp.json().await?, cookie))
}

async fn api(
    client: &reqwest::Client,
    base: &str,
    cookie: &str,
    request: Value,
) -> anyhow::Result<Value> {
    let resp = client
        .post(format!("{base}/api"))
        .header(reqwest::header::COOKIE, cookie)
        .form(&[("request", request.to_string())])
        .send()
        .await?;
    Ok(resp.json().await?)
}

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let resp: Value =
        reqwest::get(format!("{}/api/v1/health", server.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["agents"], 0);
    Ok(())
}

#[tokio::test]
async fn login_release_poll_logout_round_trip() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;
    let base = server.base_url();
    let client = reqwest::Client::new();

    let (body, cookie) = login(&client, &base, "alice", "s3cret").await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["profile"], "Support");
    assert!(cookie.starts_with("cpx_id="));

    let body = api(
        &client,
        &base,
        &cookie,
        json!({ "function": "set_state", "args": ["released", "Default"] }),
    )
    .await?;
    assert_eq!(body["success"], true);

    // The astate is already buffered, so the poll returns without waiting
    // for the keep-alive.
    let resp = client
        .post(format!("{base}/poll"))
        .header(reqwest::header::COOKIE, &cookie)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["success"], true);
    let events = body["result"].as_array().cloned().unwrap_or_default();
    assert!(
        events.iter().any(|e| e["command"] == "astate" && e["state"] == "released"),
        "events: {events:?}"
    );

    let resp = client
        .post(format!("{base}/logout"))
        .header(reqwest::header::COOKIE, &cookie)
        .send()
        .await?;
    let set_cookie = resp
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(set_cookie.starts_with("cpx_id=dead"));
    let body: Value = resp.json().await?;
    assert_eq!(body["success"], true);

    Ok(())
}

#[tokio::test]
async fn bad_password_and_duplicate_login() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;
    let base = server.base_url();
    let client = reqwest::Client::new();

    let (body, _) = login(&client, &base, "alice", "nope").await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], "BAD_REQUEST");

    let (body, _) = login(&client, &base, "alice", "s3cret").await?;
    assert_eq!(body["success"], true);

    let (body, _) = login(&client, &base, "alice", "s3cret").await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "already_logged_in");

    Ok(())
}

#[tokio::test]
async fn newer_poll_displaces_the_older() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;
    let base = server.base_url();
    let client = reqwest::Client::new();

    let (_, cookie) = login(&client, &base, "alice", "s3cret").await?;

    let first = tokio::spawn({
        let client = client.clone();
        let url = format!("{base}/poll");
        let cookie = cookie.clone();
        async move {
            let resp = client.post(url).header(reqwest::header::COOKIE, cookie).send().await?;
            let body: Value = resp.json().await?;
            anyhow::Ok(body)
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The second poll stays open; don't wait for its keep-alive pong.
    let second = tokio::spawn({
        let client = client.clone();
        let url = format!("{base}/poll");
        let cookie = cookie.clone();
        async move {
            let _ = client.post(url).header(reqwest::header::COOKIE, cookie).send().await;
        }
    });

    let body = tokio::time::timeout(TIMEOUT, first).await??;
    let body = body?;
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], ErrorCode::PollPidReplaced.as_str());

    second.abort();
    Ok(())
}

#[tokio::test]
async fn supervisor_sees_the_agent_roster() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;
    let base = server.base_url();
    let client = reqwest::Client::new();

    let (_, alice) = login(&client, &base, "alice", "s3cret").await?;
    let (_, susan) = login(&client, &base, "susan", "hunter2").await?;

    // Agents are refused.
    let resp = client
        .post(format!("{base}/api"))
        .header(reqwest::header::COOKIE, &alice)
        .form(&[("request", json!({ "function": "list_agents" }).to_string())])
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 403);

    let body = api(&client, &base, &susan, json!({ "function": "list_agents" })).await?;
    assert_eq!(body["success"], true);
    let rows = body["result"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r["login"] == "alice"));

    Ok(())
}
