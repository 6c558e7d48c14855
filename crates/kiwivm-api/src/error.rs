use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::LockingInfo;

/// Error code the provider returns for a bad API key / VEID pair.
pub const AUTH_FAILURE_CODE: i64 = 700005;

/// Error code the provider returns while another operation holds the VPS lock.
pub const LOCKED_CODE: i64 = 788888;

/// Domain error carried in a nonzero response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
    /// Description of the operation currently holding the lock.
    pub operation: Option<String>,
    pub locking: Option<LockingInfo>,
}

impl ApiError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            operation: None,
            locking: None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.code == AUTH_FAILURE_CODE
    }

    /// A mutating operation is already running on the VPS. Retryable.
    pub fn is_locked(&self) -> bool {
        self.code == LOCKED_CODE
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)?;
        } else {
            write!(f, "{}: {}", self.code, self.message)?;
        }

        if let Some(op) = &self.operation {
            write!(f, "\nOperation: {op}")?;
        }

        if let Some(info) = &self.locking {
            write!(
                f,
                "\nProgress: {}% complete - {}",
                info.completed_percent, info.friendly_progress_message
            )?;
            if info.last_status_update_secs_ago > 0 {
                write!(f, " (updated {}s ago)", info.last_status_update_secs_ago)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Input rejected before any request was sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid backup token: expected 40 lowercase hexadecimal characters, got {0:?}")]
    BackupToken(String),

    #[error("invalid SSH key at position {position}: unrecognized key type or missing key body")]
    SshKey { position: usize },

    #[error("unknown OS template {template:?}")]
    OsTemplate { template: String },

    #[error("invalid IPv6 subnet {0:?}")]
    Ipv6Subnet(String),

    #[error("invalid IPv4 address {0:?}")]
    Ipv4Address(String),

    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kiwivm api {endpoint} request failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("kiwivm api {endpoint} returned HTTP {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("kiwivm api {endpoint} returned an undecodable body: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid kiwivm api url {url:?}")]
    Url { url: String },

    #[error("kiwivm api error {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("migration timed out after {0:?}")]
    MigrationTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The domain error, if the provider answered with a nonzero status.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_auth_failure)
    }

    pub fn is_locked(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_locked)
    }

    /// Network, HTTP status, or decoding failure (as opposed to a domain or
    /// validation error).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Request { .. } | Self::Status { .. } | Self::Decode { .. } | Self::Url { .. }
        )
    }
}
