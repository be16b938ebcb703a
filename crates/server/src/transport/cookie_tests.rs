// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{header, HeaderMap, HeaderValue};

use super::{extract, invalidate, issue};

fn headers(cookie: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
    headers
}

#[test]
fn extracts_the_session_cookie() {
    assert_eq!(extract(&headers("cpx_id=abc-123")), Some("abc-123".to_owned()));
}

#[test]
fn finds_it_among_other_cookies() {
    let h = headers("theme=dark; cpx_id=abc-123; lang=en");
    assert_eq!(extract(&h), Some("abc-123".to_owned()));
}

#[yare::parameterized(
    missing = { "theme=dark" },
    dead = { "cpx_id=dead" },
    empty = { "cpx_id=" },
)]
fn absent_or_dead_reads_as_none(cookie: &str) {
    assert_eq!(extract(&headers(cookie)), None);
}

#[test]
fn no_cookie_header_is_none() {
    assert_eq!(extract(&HeaderMap::new()), None);
}

#[test]
fn issue_and_invalidate_round_trip() {
    let set = issue("abc-123");
    assert!(set.starts_with("cpx_id=abc-123"));
    assert_eq!(extract(&headers("cpx_id=abc-123")), Some("abc-123".to_owned()));

    let dead = invalidate();
    assert!(dead.starts_with("cpx_id=dead"));
}
