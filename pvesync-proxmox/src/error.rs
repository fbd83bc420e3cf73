//! Error types for the Proxmox VE boundary.

use thiserror::Error;

/// Errors that can occur while talking to the Proxmox VE API.
#[derive(Error, Debug)]
pub enum ProxmoxError {
    /// The HTTP client could not be constructed.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    /// The request never produced an HTTP response.
    #[error("Failed to connect to Proxmox API at {path}: {message}")]
    ConnectionFailed { path: String, message: String },

    /// The API token was rejected (401/403).
    #[error("Proxmox API rejected credentials ({status}) for {path}")]
    Unauthorized { status: u16, path: String },

    /// The API answered with a non-success status.
    #[error("Proxmox API returned {status} for {path}: {body}")]
    Status { status: u16, path: String, body: String },

    /// The response body did not match the expected shape.
    #[error("Failed to decode Proxmox response from {path}: {message}")]
    Decode { path: String, message: String },

    /// A guest config value could not be parsed.
    #[error("Failed to parse config value '{value}': {reason}")]
    Parse { value: String, reason: String },

    /// Guest not found (mock backend only).
    #[error("Guest not found: {0}")]
    GuestNotFound(u32),
}

impl ProxmoxError {
    /// Whether this is an authentication or authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProxmoxError::Unauthorized { .. })
    }

    pub(crate) fn parse(value: &str, reason: impl Into<String>) -> Self {
        ProxmoxError::Parse {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Proxmox operations.
pub type Result<T> = std::result::Result<T, ProxmoxError>;
