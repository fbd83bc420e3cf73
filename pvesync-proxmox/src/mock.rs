//! Mock Proxmox backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{ProxmoxError, Result};
use crate::traits::ProxmoxApi;
use crate::types::*;

/// In-memory Proxmox cluster.
///
/// Every trait call is counted so tests can assert how much a pass queried.
/// Individual guests or listings can be made to fail.
pub struct MockProxmox {
    state: RwLock<MockCluster>,
    calls: AtomicUsize,
}

#[derive(Default)]
struct MockCluster {
    nodes: BTreeMap<String, MockNode>,
    agent: HashMap<u32, Vec<AgentInterface>>,
    replicated: HashMap<String, Vec<u32>>,
    ha: Vec<u32>,
    pools: BTreeMap<String, Vec<u32>>,
    failing_guests: HashSet<u32>,
    fail_listing: bool,
    fail_ha: bool,
    fail_pools: bool,
    unauthorized: bool,
}

#[derive(Default)]
struct MockNode {
    guests: BTreeMap<u32, MockGuest>,
}

struct MockGuest {
    kind: GuestKind,
    summary: GuestSummary,
    config: GuestConfig,
}

impl MockProxmox {
    /// Create an empty mock cluster.
    pub fn new() -> Self {
        info!("Creating mock Proxmox backend");
        Self {
            state: RwLock::new(MockCluster::default()),
            calls: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MockCluster> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MockCluster> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(call = %call, "Mock Proxmox call");
        if self.read().unauthorized {
            return Err(ProxmoxError::Unauthorized {
                status: 401,
                path: call.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Test setup
    // =========================================================================

    pub fn add_node(&self, node: &str) {
        self.write().nodes.entry(node.to_string()).or_default();
    }

    /// Add or replace a guest.
    pub fn add_guest(&self, node: &str, kind: GuestKind, summary: GuestSummary, config: GuestConfig) {
        let mut state = self.write();
        for other in state.nodes.values_mut() {
            other.guests.remove(&summary.vmid);
        }
        state
            .nodes
            .entry(node.to_string())
            .or_default()
            .guests
            .insert(summary.vmid, MockGuest { kind, summary, config });
    }

    pub fn add_qemu(&self, node: &str, summary: GuestSummary, config: GuestConfig) {
        self.add_guest(node, GuestKind::Qemu, summary, config);
    }

    pub fn add_lxc(&self, node: &str, summary: GuestSummary, config: GuestConfig) {
        self.add_guest(node, GuestKind::Lxc, summary, config);
    }

    pub fn remove_guest(&self, vmid: u32) {
        for node in self.write().nodes.values_mut() {
            node.guests.remove(&vmid);
        }
    }

    /// Mutate a guest's listing row in place.
    pub fn update_summary(&self, vmid: u32, f: impl FnOnce(&mut GuestSummary)) {
        let mut state = self.write();
        if let Some(guest) = state.nodes.values_mut().find_map(|n| n.guests.get_mut(&vmid)) {
            f(&mut guest.summary);
        }
    }

    /// Mutate a guest's config in place.
    pub fn update_config(&self, vmid: u32, f: impl FnOnce(&mut GuestConfig)) {
        let mut state = self.write();
        if let Some(guest) = state.nodes.values_mut().find_map(|n| n.guests.get_mut(&vmid)) {
            f(&mut guest.config);
        }
    }

    pub fn set_agent_interfaces(&self, vmid: u32, interfaces: Vec<AgentInterface>) {
        self.write().agent.insert(vmid, interfaces);
    }

    pub fn set_replicated(&self, node: &str, vmid: u32) {
        self.write().replicated.entry(node.to_string()).or_default().push(vmid);
    }

    pub fn set_ha(&self, vmid: u32) {
        self.write().ha.push(vmid);
    }

    pub fn add_pool(&self, pool: &str) {
        self.write().pools.entry(pool.to_string()).or_default();
    }

    /// Move `vmid` into `pool`, creating the pool if needed.
    pub fn set_pool(&self, vmid: u32, pool: &str) {
        let mut state = self.write();
        for members in state.pools.values_mut() {
            members.retain(|m| *m != vmid);
        }
        state.pools.entry(pool.to_string()).or_default().push(vmid);
    }

    pub fn fail_pools(&self, fail: bool) {
        self.write().fail_pools = fail;
    }

    /// Make config and agent queries for `vmid` fail.
    pub fn fail_guest(&self, vmid: u32) {
        self.write().failing_guests.insert(vmid);
    }

    /// Make node and guest listings fail.
    pub fn fail_listing(&self, fail: bool) {
        self.write().fail_listing = fail;
    }

    pub fn fail_ha(&self, fail: bool) {
        self.write().fail_ha = fail;
    }

    /// Reject every call with 401.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.write().unauthorized = unauthorized;
    }

    /// Total number of API calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    fn listing_error(path: String) -> ProxmoxError {
        ProxmoxError::Status {
            status: 500,
            path,
            body: "mock listing failure".to_string(),
        }
    }

    fn guest_config_for(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestConfig> {
        let state = self.read();
        if state.failing_guests.contains(&vmid) {
            return Err(ProxmoxError::Status {
                status: 500,
                path: format!("/nodes/{}/{}/{}/config", node, kind, vmid),
                body: "mock guest failure".to_string(),
            });
        }
        state
            .nodes
            .get(node)
            .and_then(|n| n.guests.get(&vmid))
            .filter(|g| g.kind == kind)
            .map(|g| g.config.clone())
            .ok_or(ProxmoxError::GuestNotFound(vmid))
    }

    fn guests_of(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestSummary>> {
        let state = self.read();
        if state.fail_listing {
            return Err(Self::listing_error(format!("/nodes/{}/{}", node, kind)));
        }
        Ok(state
            .nodes
            .get(node)
            .map(|n| {
                n.guests
                    .values()
                    .filter(|g| g.kind == kind)
                    .map(|g| g.summary.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Default for MockProxmox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxmoxApi for MockProxmox {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.record("list_nodes")?;
        let state = self.read();
        if state.fail_listing {
            return Err(Self::listing_error("/nodes".to_string()));
        }
        Ok(state.nodes.keys().map(NodeInfo::new).collect())
    }

    async fn list_qemu(&self, node: &str) -> Result<Vec<GuestSummary>> {
        self.record("list_qemu")?;
        self.guests_of(node, GuestKind::Qemu)
    }

    async fn list_lxc(&self, node: &str) -> Result<Vec<GuestSummary>> {
        self.record("list_lxc")?;
        self.guests_of(node, GuestKind::Lxc)
    }

    async fn qemu_config(&self, node: &str, vmid: u32) -> Result<GuestConfig> {
        self.record("qemu_config")?;
        self.guest_config_for(node, GuestKind::Qemu, vmid)
    }

    async fn lxc_config(&self, node: &str, vmid: u32) -> Result<GuestConfig> {
        self.record("lxc_config")?;
        self.guest_config_for(node, GuestKind::Lxc, vmid)
    }

    async fn agent_network_interfaces(&self, node: &str, vmid: u32) -> Result<Vec<AgentInterface>> {
        self.record("agent_network_interfaces")?;
        let state = self.read();
        if state.failing_guests.contains(&vmid) {
            return Err(ProxmoxError::Status {
                status: 500,
                path: format!("/nodes/{}/qemu/{}/agent/network-get-interfaces", node, vmid),
                body: "QEMU guest agent is not running".to_string(),
            });
        }
        Ok(state.agent.get(&vmid).cloned().unwrap_or_default())
    }

    async fn replicated_guests(&self, node: &str) -> Result<Vec<u32>> {
        self.record("replicated_guests")?;
        Ok(self.read().replicated.get(node).cloned().unwrap_or_default())
    }

    async fn ha_guests(&self) -> Result<Vec<u32>> {
        self.record("ha_guests")?;
        let state = self.read();
        if state.fail_ha {
            return Err(ProxmoxError::Status {
                status: 500,
                path: "/cluster/ha/status/current".to_string(),
                body: "mock HA failure".to_string(),
            });
        }
        Ok(state.ha.clone())
    }

    async fn list_pools(&self) -> Result<Vec<PoolInfo>> {
        self.record("list_pools")?;
        let state = self.read();
        if state.fail_pools {
            return Err(Self::listing_error("/pools".to_string()));
        }
        Ok(state
            .pools
            .keys()
            .map(|poolid| PoolInfo {
                poolid: poolid.clone(),
                comment: None,
            })
            .collect())
    }

    async fn guest_pools(&self) -> Result<Vec<(u32, String)>> {
        self.record("guest_pools")?;
        let state = self.read();
        if state.fail_pools {
            return Err(Self::listing_error("/cluster/resources".to_string()));
        }
        Ok(state
            .pools
            .iter()
            .flat_map(|(pool, members)| members.iter().map(move |vmid| (*vmid, pool.clone())))
            .collect())
    }
}
