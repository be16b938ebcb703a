// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire error codes and the response envelope shared by `/api` and `/poll`.
//!
//! The envelope, not the HTTP status, is authoritative for business
//! failures: handlers answer 200 with `success:false` plus an `errcode`.
//! Real HTTP statuses are reserved for routing-level conditions (403 for
//! insufficient privilege, 404 for unknown paths).

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error kinds exposed to clients as `errcode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidStateChange,
    InvalidMediaCall,
    MediaNoexists,
    AgentNoexists,
    BadRequest,
    PollPidReplaced,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidStateChange => "INVALID_STATE_CHANGE",
            Self::InvalidMediaCall => "INVALID_MEDIA_CALL",
            Self::MediaNoexists => "MEDIA_NOEXISTS",
            Self::AgentNoexists => "AGENT_NOEXISTS",
            Self::BadRequest => "BAD_REQUEST",
            Self::PollPidReplaced => "POLL_PID_REPLACED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Build an [`ApiError`] carrying this code and a message.
    pub fn err(self, message: impl Into<String>) -> ApiError {
        ApiError { code: self, message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed operation: code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// The three response shapes of the wire contract: success-empty,
/// success-value, and error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self { success: true, result: None, errcode: None, message: None }
    }

    pub fn value(result: serde_json::Value) -> Self {
        Self { success: true, result: Some(result), errcode: None, message: None }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            errcode: Some(code.as_str().to_owned()),
            message: Some(message.into()),
        }
    }
}

impl From<ApiError> for ApiResponse {
    fn from(e: ApiError) -> Self {
        Self::error(e.code, e.message)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
