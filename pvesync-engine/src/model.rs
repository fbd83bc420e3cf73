//! Canonical source records.

use std::fmt;
use std::net::IpAddr;

use pvesync_netbox::models::parse_cidr;
pub use pvesync_proxmox::parse::DiskBus;
pub use pvesync_proxmox::GuestKind;

use crate::tracker::Fingerprint;

const MIB: u64 = 1024 * 1024;

/// Join key between source and target: `(name, cluster)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub name: String,
    pub cluster: u64,
}

impl EntityKey {
    pub fn new(name: impl Into<String>, cluster: u64) -> Self {
        Self {
            name: name.into(),
            cluster,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.cluster)
    }
}

/// Guest power state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    Paused,
    Other(String),
}

impl PowerState {
    pub fn parse(status: &str) -> Self {
        match status {
            "running" => PowerState::Running,
            "stopped" => PowerState::Stopped,
            "paused" | "suspended" => PowerState::Paused,
            other => PowerState::Other(other.to_string()),
        }
    }

    /// NetBox VM status value.
    pub fn target_status(&self) -> &'static str {
        match self {
            PowerState::Running => "active",
            PowerState::Paused => "paused",
            _ => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskSpec {
    /// Config slot, e.g. `scsi0`; the match key against target disks
    pub slot: String,
    pub bus: DiskBus,
    pub volume: Option<String>,
    pub size_bytes: u64,
    pub backup: bool,
}

impl DiskSpec {
    /// Size in NetBox units (MB, from MiB), never below 1.
    pub fn size_mb(&self) -> u64 {
        (self.size_bytes / MIB).max(1)
    }

    pub fn description(&self) -> String {
        match &self.volume {
            Some(volume) => format!("{} {}", self.bus, volume),
            None => self.bus.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceSpec {
    /// Config slot, e.g. `net0`
    pub slot: String,
    /// Guest-reported name when available, else the config-derived one
    pub name: String,
    /// Upper-case colon form
    pub mac: Option<String>,
    pub vlan: Option<u16>,
    pub mtu: Option<u32>,
    /// CIDR strings in report order
    pub addresses: Vec<String>,
}

impl InterfaceSpec {
    pub fn parsed_addresses(&self) -> impl Iterator<Item = (IpAddr, u8, &str)> + '_ {
        self.addresses
            .iter()
            .filter_map(|raw| parse_cidr(raw).map(|(addr, len)| (addr, len, raw.as_str())))
    }
}

/// One VM or container as seen in the source this pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntity {
    pub vmid: u32,
    pub node: String,
    pub kind: GuestKind,
    pub name: String,
    pub power: PowerState,
    pub memory_mib: u64,
    /// cores × sockets
    pub vcpus: u32,
    pub disks: Vec<DiskSpec>,
    pub interfaces: Vec<InterfaceSpec>,
    pub autostart: bool,
    pub replicated: bool,
    pub ha: bool,
    /// Proxmox resource pool
    pub pool: Option<String>,
    /// Fingerprint of the listing row this entity was built from
    pub fingerprint: Fingerprint,
}

impl SourceEntity {
    pub fn key(&self, cluster: u64) -> EntityKey {
        EntityKey::new(self.name.clone(), cluster)
    }

    /// NetBox tag carrying the entity's pool.
    pub fn pool_tag(&self) -> Option<String> {
        self.pool.as_deref().map(pool_tag_name)
    }

    /// Index of the first interface carrying any address.
    pub fn primary_interface(&self) -> Option<usize> {
        self.interfaces.iter().position(|i| !i.addresses.is_empty())
    }
}

/// Tags named `Pool/<poolid>` stand for Proxmox pools.
pub const POOL_TAG_PREFIX: &str = "Pool/";

pub fn pool_tag_name(pool: &str) -> String {
    format!("{}{}", POOL_TAG_PREFIX, pool)
}

pub fn pool_tag_slug(pool: &str) -> String {
    format!("pool-{}", pool).to_lowercase()
}
