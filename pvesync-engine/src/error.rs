//! Engine error types.

use thiserror::Error;

use pvesync_netbox::NetboxError;
use pvesync_proxmox::ProxmoxError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Source query failed.
    #[error("Proxmox: {0}")]
    Source(#[from] ProxmoxError),

    /// Target call failed.
    #[error("NetBox: {0}")]
    Target(#[from] NetboxError),

    /// Custom fields or roles could not be ensured.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// A guest requested for a scoped resync is no longer listed.
    #[error("Guest {0} not found in source")]
    GuestGone(u32),
}

impl EngineError {
    /// Authentication or authorization failure on either side.
    pub fn is_auth(&self) -> bool {
        match self {
            EngineError::Source(e) => e.is_auth(),
            EngineError::Target(e) => e.is_auth(),
            _ => false,
        }
    }

    /// Whether the error must stop the process at startup.
    pub fn is_fatal(&self) -> bool {
        self.is_auth() || matches!(self, EngineError::Provisioning(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
