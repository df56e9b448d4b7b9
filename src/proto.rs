//! Wire format spoken with the in-pod agent.
//!
//! The JSON field names and the error tokens are a contract with the agent
//! and must not change.

use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub retry_interval: i32,
}

impl From<crate::apis::RetryPolicy> for RetryPolicy {
    fn from(p: crate::apis::RetryPolicy) -> Self {
        RetryPolicy {
            max_retries: p.max_retries,
            retry_interval: p.retry_interval,
        }
    }
}

/// `output` travels base64 encoded, the same way the agent marshals raw bytes.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ActionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ByteString>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ActionResponse {
    pub fn with_output(output: impl Into<Vec<u8>>) -> Self {
        ActionResponse {
            output: Some(ByteString(output.into())),
            ..ActionResponse::default()
        }
    }

    pub fn with_error(code: ErrorCode, message: impl Into<String>) -> Self {
        ActionResponse {
            error: code.as_str().to_string(),
            message: message.into(),
            ..ActionResponse::default()
        }
    }
}

/// Closed vocabulary of error codes reported by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined,
    NotImplemented,
    PreconditionFailed,
    BadRequest,
    InProgress,
    Busy,
    TimedOut,
    Failed,
    InternalError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::NotDefined,
        ErrorCode::NotImplemented,
        ErrorCode::PreconditionFailed,
        ErrorCode::BadRequest,
        ErrorCode::InProgress,
        ErrorCode::Busy,
        ErrorCode::TimedOut,
        ErrorCode::Failed,
        ErrorCode::InternalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "not-defined",
            ErrorCode::NotImplemented => "not-implemented",
            ErrorCode::PreconditionFailed => "precondition-failed",
            ErrorCode::BadRequest => "bad-request",
            ErrorCode::InProgress => "in-progress",
            ErrorCode::Busy => "busy",
            ErrorCode::TimedOut => "timed-out",
            ErrorCode::Failed => "failed",
            ErrorCode::InternalError => "internal-error",
        }
    }

    pub fn parse(code: &str) -> Option<ErrorCode> {
        ErrorCode::ALL.iter().copied().find(|c| c.as_str() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
