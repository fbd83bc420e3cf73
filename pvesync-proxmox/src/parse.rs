//! Parsers for Proxmox guest config strings.
//!
//! Guest configs encode devices as property strings such as
//! `virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0,tag=100` or
//! `local-lvm:vm-100-disk-0,size=32G,backup=0`.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, warn};

use crate::error::{ProxmoxError, Result};
use crate::types::{AgentInterface, GuestConfig};

/// NIC model keys that carry the MAC address on VM `net<N>` entries.
const NIC_MODELS: &[&str] = &["virtio", "e1000", "e1000e", "rtl8139", "vmxnet3"];

/// VM config key prefixes that denote disk slots.
const VM_DISK_PREFIXES: &[(&str, DiskBus)] = &[
    ("scsi", DiskBus::Scsi),
    ("sata", DiskBus::Sata),
    ("virtio", DiskBus::Virtio),
    ("ide", DiskBus::Ide),
    ("efidisk", DiskBus::Efi),
];

// =============================================================================
// Property strings
// =============================================================================

/// A parsed `k=v,k=v` property string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyString {
    /// Leading bare component (volume id for disks)
    pub volume: Option<String>,
    values: BTreeMap<String, String>,
}

impl PropertyString {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Parse a property string.
///
/// Components without `=` are treated as the volume; only the first one is kept.
pub fn parse_property_string(raw: &str) -> PropertyString {
    let mut parsed = PropertyString::default();
    for component in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        match component.split_once('=') {
            Some((key, value)) => {
                parsed.values.insert(key.to_string(), value.to_string());
            }
            None if parsed.volume.is_none() => parsed.volume = Some(component.to_string()),
            None => {}
        }
    }
    parsed
}

// =============================================================================
// Scalars
// =============================================================================

/// Parse a disk size (`32G`, `512m`, `2048K`, `1T`) into bytes.
///
/// Suffixes are binary multiples and case-insensitive. A bare integer is bytes.
pub fn parse_size(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let last = trimmed
        .chars()
        .last()
        .ok_or_else(|| ProxmoxError::parse(raw, "empty size"))?;

    let (number, multiplier) = if last.is_ascii_alphabetic() {
        let multiplier: u64 = match last.to_ascii_uppercase() {
            'K' => 1 << 10,
            'M' => 1 << 20,
            'G' => 1 << 30,
            'T' => 1 << 40,
            other => return Err(ProxmoxError::parse(raw, format!("unknown unit '{}'", other))),
        };
        (&trimmed[..trimmed.len() - 1], multiplier)
    } else {
        (trimmed, 1)
    };

    if let Ok(value) = number.parse::<u64>() {
        return value
            .checked_mul(multiplier)
            .ok_or_else(|| ProxmoxError::parse(raw, "size overflows"));
    }

    match number.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => {
            Ok((value * multiplier as f64).round() as u64)
        }
        _ => Err(ProxmoxError::parse(raw, "not a number")),
    }
}

/// Normalise a MAC to upper-case colon form. Returns `None` if malformed.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<&str> = raw.trim().split([':', '-']).collect();
    if octets.len() != 6 {
        return None;
    }
    if !octets
        .iter()
        .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    Some(octets.join(":").to_ascii_uppercase())
}

/// vCPU count: cores per socket times sockets.
pub fn vcpus(config: &GuestConfig) -> u32 {
    let cores = config.get_u64("cores").unwrap_or(1).max(1);
    let sockets = config.get_u64("sockets").unwrap_or(1).max(1);
    u32::try_from(cores * sockets).unwrap_or(u32::MAX)
}

/// Whether the QEMU guest agent is enabled (`agent: 1` or `agent: enabled=1,...`).
pub fn agent_enabled(config: &GuestConfig) -> bool {
    let Some(raw) = config.get("agent") else {
        return false;
    };
    let agent = parse_property_string(raw);
    if agent.volume.as_deref() == Some("1") {
        return true;
    }
    agent.get("enabled") == Some("1")
}

/// Whether the guest starts on boot.
pub fn autostart(config: &GuestConfig) -> bool {
    config.get("onboot").map(str::trim) == Some("1")
}

/// Configured memory in MiB.
pub fn memory_mib(config: &GuestConfig, default: u64) -> u64 {
    config.get_u64("memory").unwrap_or(default)
}

// Numeric index of `key` when it is `prefix` followed by digits only.
fn slot_index(key: &str, prefix: &str) -> Option<u32> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

// =============================================================================
// Disks
// =============================================================================

/// Bus a disk is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiskBus {
    Scsi,
    Sata,
    Virtio,
    Ide,
    Efi,
    /// Container root filesystem
    RootFs,
    /// Container mount point
    MountPoint,
}

impl DiskBus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskBus::Scsi => "SCSI",
            DiskBus::Sata => "SATA",
            DiskBus::Virtio => "VirtIO",
            DiskBus::Ide => "IDE",
            DiskBus::Efi => "EFI",
            DiskBus::RootFs => "rootfs",
            DiskBus::MountPoint => "mp",
        }
    }
}

impl fmt::Display for DiskBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A disk slot parsed from a guest config.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskEntry {
    /// Config key, e.g. `scsi0`, `rootfs`, `mp1`
    pub slot: String,
    pub bus: DiskBus,
    pub volume: Option<String>,
    pub size_bytes: u64,
    pub backup: bool,
}

fn disk_entry(slot: &str, bus: DiskBus, props: &PropertyString) -> Option<DiskEntry> {
    let Some(size) = props.get("size") else {
        debug!(slot = %slot, "Disk has no size, skipping");
        return None;
    };
    let size_bytes = match parse_size(size) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(slot = %slot, error = %e, "Unparseable disk size, skipping disk");
            return None;
        }
    };
    Some(DiskEntry {
        slot: slot.to_string(),
        bus,
        volume: props.volume.clone(),
        size_bytes,
        backup: props.get("backup") != Some("0"),
    })
}

/// Disks of a QEMU VM, ordered by bus then slot index.
///
/// Skips controllers, TPM state, the `ide2` cloud-init/CD slot and CD-ROM media.
pub fn qemu_disks(config: &GuestConfig) -> Vec<DiskEntry> {
    let mut disks: Vec<(DiskBus, u32, DiskEntry)> = Vec::new();

    for (key, value) in config.iter() {
        let Some((bus, index)) = VM_DISK_PREFIXES
            .iter()
            .find_map(|(prefix, bus)| slot_index(key, prefix).map(|i| (*bus, i)))
        else {
            continue;
        };
        if key == "ide2" {
            continue;
        }
        let props = parse_property_string(value);
        if props.get("media") == Some("cdrom") {
            continue;
        }
        if let Some(entry) = disk_entry(key, bus, &props) {
            disks.push((bus, index, entry));
        }
    }

    disks.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    disks.into_iter().map(|(_, _, entry)| entry).collect()
}

/// Disks of an LXC container: `rootfs` first, then `mp<N>` in index order.
pub fn lxc_disks(config: &GuestConfig) -> Vec<DiskEntry> {
    let mut disks = Vec::new();

    if let Some(rootfs) = config.get("rootfs") {
        disks.extend(disk_entry("rootfs", DiskBus::RootFs, &parse_property_string(rootfs)));
    }

    let mut mounts: Vec<(u32, DiskEntry)> = config
        .iter()
        .filter_map(|(key, value)| {
            let index = slot_index(key, "mp")?;
            let entry = disk_entry(key, DiskBus::MountPoint, &parse_property_string(value))?;
            Some((index, entry))
        })
        .collect();
    mounts.sort_by_key(|(index, _)| *index);
    disks.extend(mounts.into_iter().map(|(_, entry)| entry));

    disks
}

// =============================================================================
// Network interfaces
// =============================================================================

/// A `net<N>` entry parsed from a guest config.
#[derive(Debug, Clone, PartialEq)]
pub struct NicEntry {
    /// Config key, e.g. `net0`
    pub slot: String,
    /// Upper-case colon form
    pub mac: Option<String>,
    pub vlan: Option<u16>,
    pub mtu: Option<u32>,
    /// Interface name inside the guest (containers only)
    pub name: Option<String>,
    /// Static CIDR addresses (containers only)
    pub addresses: Vec<String>,
}

fn nic_common(slot: &str, props: &PropertyString, mac: Option<&str>) -> NicEntry {
    let mac = mac.and_then(|raw| {
        let normalized = normalize_mac(raw);
        if normalized.is_none() {
            warn!(slot = %slot, mac = %raw, "Ignoring malformed MAC address");
        }
        normalized
    });
    NicEntry {
        slot: slot.to_string(),
        mac,
        vlan: props
            .get("tag")
            .and_then(|t| t.parse::<u16>().ok())
            .filter(|vid| (1..=4094).contains(vid)),
        // mtu=1 means "inherit from bridge"
        mtu: props
            .get("mtu")
            .and_then(|m| m.parse::<u32>().ok())
            .filter(|m| *m > 1),
        name: None,
        addresses: Vec::new(),
    }
}

fn net_slots(config: &GuestConfig) -> Vec<(u32, &str, &str)> {
    let mut slots: Vec<(u32, &str, &str)> = config
        .iter()
        .filter_map(|(key, value)| slot_index(key, "net").map(|i| (i, key, value)))
        .collect();
    slots.sort_by_key(|(index, _, _)| *index);
    slots
}

/// Network interfaces of a QEMU VM in slot order.
pub fn qemu_nics(config: &GuestConfig) -> Vec<NicEntry> {
    net_slots(config)
        .into_iter()
        .map(|(_, key, value)| {
            let props = parse_property_string(value);
            let mac = NIC_MODELS.iter().find_map(|model| props.get(model));
            nic_common(key, &props, mac)
        })
        .collect()
}

/// Network interfaces of an LXC container in slot order.
pub fn lxc_nics(config: &GuestConfig) -> Vec<NicEntry> {
    net_slots(config)
        .into_iter()
        .map(|(_, key, value)| {
            let props = parse_property_string(value);
            let mut nic = nic_common(key, &props, props.get("hwaddr"));
            nic.name = props.get("name").map(str::to_string);
            nic.addresses = ["ip", "ip6"]
                .iter()
                .filter_map(|k| props.get(k))
                .filter(|v| is_static_cidr(v))
                .map(str::to_string)
                .collect();
            nic
        })
        .collect()
}

// `dhcp`, `auto` and `manual` carry no address.
fn is_static_cidr(value: &str) -> bool {
    match value.split_once('/') {
        Some((addr, len)) => addr.parse::<IpAddr>().is_ok() && len.parse::<u8>().is_ok(),
        None => false,
    }
}

// =============================================================================
// Guest agent
// =============================================================================

/// Whether an address reported by the guest agent should be synced.
pub fn is_syncable_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_unspecified(),
        IpAddr::V6(v6) => {
            !v6.is_loopback() && !v6.is_unspecified() && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// CIDR addresses reported by the agent for one interface.
///
/// Loopback and IPv6 link-local addresses are dropped, as are entries without a prefix.
pub fn agent_addresses(iface: &AgentInterface) -> Vec<String> {
    iface
        .ip_addresses
        .iter()
        .filter_map(|entry| {
            let addr: IpAddr = entry.ip_address.parse().ok()?;
            let prefix = entry.prefix?;
            is_syncable_address(&addr).then(|| format!("{}/{}", addr, prefix))
        })
        .collect()
}

/// Whether an agent interface is the guest loopback.
pub fn is_loopback_interface(iface: &AgentInterface) -> bool {
    iface.name == "lo" || iface.name.starts_with("Loopback")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentIpAddress;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("10G").unwrap(), 10 * 1024u64.pow(3));
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024u64.pow(2));
        assert_eq!(parse_size("1T").unwrap(), 1024u64.pow(4));
        assert_eq!(parse_size("2048K").unwrap(), 2048 * 1024);
    }

    #[test]
    fn test_parse_size_case_and_bare_bytes() {
        assert_eq!(parse_size("10g").unwrap(), 10 * 1024u64.pow(3));
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("1.5G").unwrap(), 3 * 512 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("10X").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("abc").is_err());
    }

    #[test]
    fn test_property_string() {
        let props = parse_property_string("local-lvm:vm-100-disk-0,size=32G,backup=0");
        assert_eq!(props.volume.as_deref(), Some("local-lvm:vm-100-disk-0"));
        assert_eq!(props.get("size"), Some("32G"));
        assert_eq!(props.get("backup"), Some("0"));
        assert!(!props.contains("media"));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("aa:bb:cc:dd:ee:0f").as_deref(),
            Some("AA:BB:CC:DD:EE:0F")
        );
        assert_eq!(
            normalize_mac("AA-BB-CC-DD-EE-FF").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert!(normalize_mac("not-a-mac").is_none());
        assert!(normalize_mac("AA:BB:CC:DD:EE").is_none());
    }

    #[test]
    fn test_vcpus_is_cores_times_sockets() {
        let config = GuestConfig::new().with("cores", "4").with("sockets", "2");
        assert_eq!(vcpus(&config), 8);
        assert_eq!(vcpus(&GuestConfig::new()), 1);
    }

    #[test]
    fn test_agent_enabled_forms() {
        assert!(agent_enabled(&GuestConfig::new().with("agent", "1")));
        assert!(agent_enabled(&GuestConfig::new().with("agent", "1,fstrim_cloned_disks=1")));
        assert!(agent_enabled(&GuestConfig::new().with("agent", "enabled=1,type=virtio")));
        assert!(!agent_enabled(&GuestConfig::new().with("agent", "0")));
        assert!(!agent_enabled(&GuestConfig::new()));
    }

    #[test]
    fn test_qemu_disks_excludes_internal_slots() {
        let config = GuestConfig::new()
            .with("scsihw", "virtio-scsi-pci")
            .with("scsi0", "local-lvm:vm-100-disk-0,size=32G")
            .with("scsi1", "local-lvm:vm-100-disk-1,size=100G,backup=0")
            .with("ide2", "local-lvm:vm-100-cloudinit,media=cdrom")
            .with("ide0", "local:iso/debian.iso,media=cdrom,size=600M")
            .with("tpmstate0", "local-lvm:vm-100-disk-2,size=4M,version=v2.0")
            .with("efidisk0", "local-lvm:vm-100-disk-3,efitype=4m,size=4M")
            .with("virtio0", "local-lvm:vm-100-disk-4");

        let disks = qemu_disks(&config);
        let slots: Vec<&str> = disks.iter().map(|d| d.slot.as_str()).collect();
        assert_eq!(slots, vec!["scsi0", "scsi1", "efidisk0"]);
        assert!(disks[0].backup);
        assert!(!disks[1].backup);
        assert_eq!(disks[1].size_bytes, 100 * 1024u64.pow(3));
        assert_eq!(disks[2].bus, DiskBus::Efi);
    }

    #[test]
    fn test_qemu_disks_skip_unparseable_size() {
        let config = GuestConfig::new()
            .with("scsi0", "local-lvm:vm-100-disk-0,size=huge")
            .with("sata0", "local-lvm:vm-100-disk-1,size=8G");

        let disks = qemu_disks(&config);
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].slot, "sata0");
    }

    #[test]
    fn test_lxc_disks() {
        let config = GuestConfig::new()
            .with("rootfs", "local-lvm:vm-101-disk-0,size=8G")
            .with("mp10", "local-lvm:vm-101-disk-2,mp=/srv,size=1G")
            .with("mp2", "local-lvm:vm-101-disk-1,mp=/data,size=2048K,backup=0");

        let disks = lxc_disks(&config);
        let slots: Vec<&str> = disks.iter().map(|d| d.slot.as_str()).collect();
        assert_eq!(slots, vec!["rootfs", "mp2", "mp10"]);
        assert_eq!(disks[1].size_bytes, 2048 * 1024);
        assert!(!disks[1].backup);
    }

    #[test]
    fn test_qemu_nics() {
        let config = GuestConfig::new()
            .with("net1", "e1000=aa:bb:cc:00:00:02,bridge=vmbr1,mtu=1")
            .with("net0", "virtio=AA:BB:CC:00:00:01,bridge=vmbr0,tag=100,mtu=9000");

        let nics = qemu_nics(&config);
        assert_eq!(nics.len(), 2);
        assert_eq!(nics[0].slot, "net0");
        assert_eq!(nics[0].mac.as_deref(), Some("AA:BB:CC:00:00:01"));
        assert_eq!(nics[0].vlan, Some(100));
        assert_eq!(nics[0].mtu, Some(9000));
        assert_eq!(nics[1].mac.as_deref(), Some("AA:BB:CC:00:00:02"));
        assert_eq!(nics[1].mtu, None);
    }

    #[test]
    fn test_lxc_nics_static_addresses_only() {
        let config = GuestConfig::new()
            .with(
                "net0",
                "name=eth0,bridge=vmbr0,hwaddr=BC:24:11:00:00:01,ip=10.0.0.5/24,gw=10.0.0.1,ip6=auto",
            )
            .with("net1", "name=eth1,bridge=vmbr1,hwaddr=BC:24:11:00:00:02,ip=dhcp,ip6=fd00::5/64");

        let nics = lxc_nics(&config);
        assert_eq!(nics[0].name.as_deref(), Some("eth0"));
        assert_eq!(nics[0].addresses, vec!["10.0.0.5/24"]);
        assert_eq!(nics[1].addresses, vec!["fd00::5/64"]);
    }

    #[test]
    fn test_agent_addresses_filtering() {
        let iface = AgentInterface {
            name: "eth0".to_string(),
            hardware_address: Some("aa:bb:cc:00:00:01".to_string()),
            ip_addresses: vec![
                AgentIpAddress {
                    ip_address: "10.0.0.5".to_string(),
                    ip_address_type: "ipv4".to_string(),
                    prefix: Some(24),
                },
                AgentIpAddress {
                    ip_address: "fe80::1".to_string(),
                    ip_address_type: "ipv6".to_string(),
                    prefix: Some(64),
                },
                AgentIpAddress {
                    ip_address: "2001:db8::5".to_string(),
                    ip_address_type: "ipv6".to_string(),
                    prefix: Some(64),
                },
                AgentIpAddress {
                    ip_address: "127.0.0.1".to_string(),
                    ip_address_type: "ipv4".to_string(),
                    prefix: Some(8),
                },
                AgentIpAddress {
                    ip_address: "10.0.0.6".to_string(),
                    ip_address_type: "ipv4".to_string(),
                    prefix: None,
                },
            ],
        };

        assert_eq!(agent_addresses(&iface), vec!["10.0.0.5/24", "2001:db8::5/64"]);
    }
}
