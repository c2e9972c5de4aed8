//! Typed failures of a gateway call.
//!
//! Every failure a caller can observe is a [`GatewayError`]. Protocol glue
//! maps [`GatewayError::kind`] onto its own status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

use pigate_config::ConfigError;

use crate::transport::TransportError;

/// Stable, machine-readable category of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    RateLimited,
    PolicyDenied,
    NotFound,
    InvalidArguments,
    Remote,
    Timeout,
    Agent,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::PolicyDenied => "policy_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::Remote => "remote",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Agent => "agent",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the dispatcher and everything beneath it.
///
/// Messages never carry credentials or key material.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthorized(_) => ErrorKind::Unauthorized,
            GatewayError::RateLimited => ErrorKind::RateLimited,
            GatewayError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            GatewayError::Remote(_) => ErrorKind::Remote,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
            GatewayError::Agent(_) => ErrorKind::Agent,
            GatewayError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GatewayError::InvalidArguments(msg.into())
    }

    pub(crate) fn denied(msg: impl Into<String>) -> Self {
        GatewayError::PolicyDenied(msg.into())
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => GatewayError::Timeout(err.to_string()),
            TransportError::InvalidRequest(msg) => GatewayError::InvalidArguments(msg),
            other => GatewayError::Remote(other.to_string()),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}
