//! Source collaborator abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Read-only view of a Proxmox VE cluster.
///
/// Implemented by [`crate::ProxmoxClient`] against the real API and by
/// [`crate::MockProxmox`] for tests.
#[async_trait]
pub trait ProxmoxApi: Send + Sync {
    // =========================================================================
    // Listings
    // =========================================================================

    /// List cluster nodes.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// List QEMU VMs on a node.
    async fn list_qemu(&self, node: &str) -> Result<Vec<GuestSummary>>;

    /// List LXC containers on a node.
    async fn list_lxc(&self, node: &str) -> Result<Vec<GuestSummary>>;

    // =========================================================================
    // Per-guest detail
    // =========================================================================

    /// Current configuration of a VM.
    async fn qemu_config(&self, node: &str, vmid: u32) -> Result<GuestConfig>;

    /// Current configuration of a container.
    async fn lxc_config(&self, node: &str, vmid: u32) -> Result<GuestConfig>;

    /// Interfaces reported by the QEMU guest agent.
    ///
    /// Only meaningful when the agent is enabled and the VM is running.
    async fn agent_network_interfaces(&self, node: &str, vmid: u32) -> Result<Vec<AgentInterface>>;

    // =========================================================================
    // Informational
    // =========================================================================

    /// Guests with a replication job on `node`.
    async fn replicated_guests(&self, node: &str) -> Result<Vec<u32>>;

    /// Guests managed as HA services.
    async fn ha_guests(&self) -> Result<Vec<u32>>;

    /// Resource pools.
    async fn list_pools(&self) -> Result<Vec<PoolInfo>>;

    /// `(vmid, pool)` for every guest that belongs to a pool.
    async fn guest_pools(&self) -> Result<Vec<(u32, String)>>;

    /// Config for either guest kind.
    async fn guest_config(&self, kind: GuestKind, node: &str, vmid: u32) -> Result<GuestConfig> {
        match kind {
            GuestKind::Qemu => self.qemu_config(node, vmid).await,
            GuestKind::Lxc => self.lxc_config(node, vmid).await,
        }
    }

    /// Listing for either guest kind.
    async fn list_guests(&self, kind: GuestKind, node: &str) -> Result<Vec<GuestSummary>> {
        match kind {
            GuestKind::Qemu => self.list_qemu(node).await,
            GuestKind::Lxc => self.list_lxc(node).await,
        }
    }
}
