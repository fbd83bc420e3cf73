//! Error types for the NetBox boundary.

use thiserror::Error;

/// Errors surfaced by the transport, gateway and client.
#[derive(Error, Debug)]
pub enum NetboxError {
    /// The HTTP client could not be constructed.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    /// No HTTP response was received (connect/reset/timeout).
    #[error("Transport error on {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The API token was rejected (401/403).
    #[error("NetBox rejected credentials ({status}) on {operation} [{entity}]")]
    Unauthorized {
        status: u16,
        operation: String,
        entity: String,
    },

    /// Non-retryable error status.
    #[error("NetBox returned {status} on {operation} [{entity}]: {body}")]
    Status {
        status: u16,
        operation: String,
        entity: String,
        body: String,
    },

    /// Retryable failures persisted for every allowed attempt.
    #[error("NetBox {operation} [{entity}] failed after {attempts} attempts (last status: {})",
        describe_status(.last_status))]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
        operation: String,
        entity: String,
    },

    /// The response body did not match the expected shape.
    #[error("Failed to decode NetBox response for {operation}: {message}")]
    Decode { operation: String, message: String },
}

impl NetboxError {
    /// Whether this is an authentication or authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, NetboxError::Unauthorized { .. })
    }

    /// Whether the error happened below HTTP (worth retrying).
    pub fn is_transport(&self) -> bool {
        matches!(self, NetboxError::Transport { .. })
    }

    /// HTTP status involved, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetboxError::Unauthorized { status, .. } | NetboxError::Status { status, .. } => Some(*status),
            NetboxError::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "transport error".to_string(),
    }
}

/// Statuses the gateway retries.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503)
}

/// Result type alias for NetBox operations.
pub type Result<T> = std::result::Result<T, NetboxError>;
