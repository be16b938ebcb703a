// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cpx_id` session cookie plumbing.

use axum::http::HeaderMap;

/// Cookie tying the TCP request to a session handle.
pub const COOKIE_NAME: &str = "cpx_id";

/// Value written on logout so stale clients fail fast.
pub const DEAD_VALUE: &str = "dead";

/// Pull the session cookie out of the request headers. The `dead` sentinel
/// reads as absent.
pub fn extract(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(COOKIE_NAME) {
            if let Some(value) = value.strip_prefix('=') {
                if value.is_empty() || value == DEAD_VALUE {
                    return None;
                }
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// `Set-Cookie` value binding a fresh session.
pub fn issue(id: &str) -> String {
    format!("{COOKIE_NAME}={id}; Path=/; HttpOnly")
}

/// `Set-Cookie` value tearing the session cookie down.
pub fn invalidate() -> String {
    format!("{COOKIE_NAME}={DEAD_VALUE}; Path=/; HttpOnly")
}

#[cfg(test)]
#[path = "cookie_tests.rs"]
mod tests;
