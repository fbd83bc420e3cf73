//! Shared fixtures: in-memory Proxmox and NetBox wired to the engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pvesync_engine::model::{DiskBus, GuestKind};
use pvesync_engine::{
    DiskSpec, Engine, Fingerprint, InterfaceSpec, InventoryLoader, PowerState, SourceEntity, SyncOptions,
    TargetInventory,
};
use pvesync_netbox::{Gateway, GatewayConfig, MockNetbox, NetboxClient};
use pvesync_proxmox::{AgentInterface, AgentIpAddress, GuestConfig, GuestSummary, MockProxmox};

pub const CLUSTER: u64 = 1;

pub struct Harness {
    pub proxmox: Arc<MockProxmox>,
    pub netbox: Arc<MockNetbox>,
    pub client: NetboxClient,
}

impl Harness {
    pub fn new() -> Self {
        let netbox = Arc::new(MockNetbox::new());
        let gateway = Gateway::new(
            netbox.clone(),
            GatewayConfig {
                delay: Duration::ZERO,
                retry_total: 1,
                backoff_factor: 0.0,
            },
        );
        Self {
            proxmox: Arc::new(MockProxmox::new()),
            netbox,
            client: NetboxClient::new(Arc::new(gateway)),
        }
    }

    pub fn engine(&self, options: SyncOptions) -> Engine {
        Engine::new(self.proxmox.clone(), self.client.clone(), options)
    }

    pub async fn inventory(&self) -> TargetInventory {
        InventoryLoader::new(self.client.clone(), CLUSTER).load().await.unwrap()
    }

    /// A running VM with an agent-reported interface, and an LXC container,
    /// both tagged into VLAN 20.
    pub fn seed_cluster(&self) {
        self.proxmox.add_qemu(
            "pve1",
            GuestSummary::new(100, "web01", "running"),
            GuestConfig::new()
                .with("agent", "1")
                .with("cores", "2")
                .with("sockets", "1")
                .with("memory", "2048")
                .with("onboot", "1")
                .with("net0", "virtio=AA:BB:CC:00:01:00,bridge=vmbr0,tag=20")
                .with("scsi0", "local-lvm:vm-100-disk-0,size=32G")
                .with("ide2", "local-lvm:vm-100-cloudinit,media=cdrom"),
        );
        self.proxmox.set_agent_interfaces(
            100,
            vec![agent_interface(
                "ens18",
                "aa:bb:cc:00:01:00",
                &[("10.0.20.10", 24), ("2001:db8::10", 64)],
            )],
        );
        self.proxmox.add_lxc(
            "pve1",
            GuestSummary::new(101, "dns01", "running"),
            GuestConfig::new()
                .with("hostname", "dns01")
                .with("cores", "1")
                .with("memory", "1024")
                .with("rootfs", "local-lvm:subvol-101-disk-0,size=8G")
                .with("net0", "name=eth0,bridge=vmbr0,hwaddr=BC:24:11:00:01:01,ip=10.0.20.53/24,tag=20"),
        );
    }
}

pub fn agent_interface(name: &str, mac: &str, addresses: &[(&str, u8)]) -> AgentInterface {
    AgentInterface {
        name: name.to_string(),
        hardware_address: Some(mac.to_string()),
        ip_addresses: addresses
            .iter()
            .map(|(ip, prefix)| AgentIpAddress {
                ip_address: ip.to_string(),
                ip_address_type: if ip.contains(':') { "ipv6" } else { "ipv4" }.to_string(),
                prefix: Some(*prefix),
            })
            .collect(),
    }
}

pub fn interface(slot: &str, name: &str, mac: Option<&str>, addresses: &[&str]) -> InterfaceSpec {
    InterfaceSpec {
        slot: slot.to_string(),
        name: name.to_string(),
        mac: mac.map(str::to_string),
        vlan: None,
        mtu: None,
        addresses: addresses.iter().map(|a| a.to_string()).collect(),
    }
}

pub fn disk(slot: &str, gib: u64) -> DiskSpec {
    DiskSpec {
        slot: slot.to_string(),
        bus: DiskBus::Scsi,
        volume: Some(format!("local-lvm:{}", slot)),
        size_bytes: gib * 1024 * 1024 * 1024,
        backup: true,
    }
}

pub fn entity(vmid: u32, name: &str, power: PowerState, interfaces: Vec<InterfaceSpec>) -> SourceEntity {
    let status = match power {
        PowerState::Running => "running",
        _ => "stopped",
    };
    SourceEntity {
        vmid,
        node: "pve1".to_string(),
        kind: GuestKind::Qemu,
        name: name.to_string(),
        power,
        memory_mib: 2048,
        vcpus: 2,
        disks: Vec::new(),
        interfaces,
        autostart: false,
        replicated: false,
        ha: false,
        pool: None,
        fingerprint: Fingerprint::of(GuestKind::Qemu, "pve1", &GuestSummary::new(vmid, name, status)),
    }
}
