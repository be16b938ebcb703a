// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `switchboard` binary as a subprocess with a throwaway
//! agent directory and exercises it over HTTP.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `switchboard` binary.
pub fn server_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("switchboard")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// The agent directory served to every spawned process.
pub const AGENTS_JSON: &str = r#"[
    { "login": "alice", "password": "s3cret", "profile": "Support" },
    { "login": "susan", "password": "hunter2", "security": "supervisor" }
]"#;

/// A running `switchboard` process, killed on drop.
pub struct ServerProcess {
    child: Child,
    port: u16,
    _agents_file: tempfile::NamedTempFile,
}

impl ServerProcess {
    pub fn start() -> anyhow::Result<Self> {
        let mut agents_file = tempfile::NamedTempFile::new()?;
        agents_file.write_all(AGENTS_JSON.as_bytes())?;

        let port = free_port()?;
        let child = Command::new(server_binary())
            .args([
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--agents-file",
                &agents_file.path().display().to_string(),
                "--log-format",
                "text",
                "--log-level",
                "warn",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        Ok(Self { child, port, _agents_file: agents_file })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll the health endpoint until the server answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if let Ok(resp) = reqwest::get(&url).await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("server never became healthy");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Extract the `cpx_id` cookie pair from a login response.
pub fn cookie_of(resp: &reqwest::Response) -> anyhow::Result<String> {
    let set_cookie = resp
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| anyhow::anyhow!("login response had no Set-Cookie"))?;
    Ok(set_cookie.split(';').next().unwrap_or_default().to_owned())
}
