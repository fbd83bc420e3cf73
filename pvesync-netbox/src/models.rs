//! Typed views of NetBox objects.
//!
//! Only the fields the sync reads are modelled; everything else in the
//! payload is ignored.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Nested reference (`{"id": 7, "name": ..., "url": ...}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRef {
    pub id: u64,
}

/// Choice field (`{"value": "active", "label": "Active"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VirtualMachine {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub status: Option<Choice>,
    #[serde(default)]
    pub cluster: Option<NestedRef>,
    #[serde(default)]
    pub role: Option<NestedRef>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub vcpus: Option<f64>,
    /// Memory in MB
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    #[serde(default)]
    pub primary_ip4: Option<NestedRef>,
    #[serde(default)]
    pub primary_ip6: Option<NestedRef>,
    #[serde(default)]
    pub site: Option<NestedRef>,
    #[serde(default)]
    pub device: Option<NestedRef>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

impl VirtualMachine {
    pub fn status_value(&self) -> Option<&str> {
        self.status.as_ref().map(|c| c.value.as_str())
    }

    pub fn cluster_id(&self) -> Option<u64> {
        self.cluster.map(|c| c.id)
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.name.as_str())
    }
}

/// Tag as nested in a tagged object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VmInterface {
    pub id: u64,
    pub virtual_machine: NestedRef,
    pub name: String,
    /// Read-only since NetBox 4.2; mirrors the primary MAC object
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub primary_mac_address: Option<NestedRef>,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub mode: Option<Choice>,
    #[serde(default)]
    pub untagged_vlan: Option<NestedRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IpAddress {
    pub id: u64,
    /// `host/prefixlen`
    pub address: String,
    #[serde(default)]
    pub vrf: Option<NestedRef>,
    #[serde(default)]
    pub assigned_object_type: Option<String>,
    #[serde(default)]
    pub assigned_object_id: Option<u64>,
    #[serde(default)]
    pub dns_name: String,
}

impl IpAddress {
    pub fn assignment(&self) -> Assignment {
        Assignment::of(self.assigned_object_type.as_deref(), self.assigned_object_id)
    }

    /// Interface the address is assigned to, if it is a VM interface.
    pub fn vm_interface(&self) -> Option<u64> {
        self.assignment().vm_interface()
    }
}

/// `dcim/mac-addresses` object (NetBox 4.2+).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MacAddress {
    pub id: u64,
    pub mac_address: String,
    #[serde(default)]
    pub assigned_object_type: Option<String>,
    #[serde(default)]
    pub assigned_object_id: Option<u64>,
}

impl MacAddress {
    pub fn assignment(&self) -> Assignment {
        Assignment::of(self.assigned_object_type.as_deref(), self.assigned_object_id)
    }

    pub fn vm_interface(&self) -> Option<u64> {
        self.assignment().vm_interface()
    }
}

/// `assigned_object_type` of VM interfaces.
pub const VM_INTERFACE_TYPE: &str = "virtualization.vminterface";

/// What a generically assigned object (IP or MAC) is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Unassigned,
    VmInterface(u64),
    /// Any other object type, e.g. a device interface
    Other { object_type: String, id: u64 },
}

impl Assignment {
    pub fn of(object_type: Option<&str>, id: Option<u64>) -> Self {
        match (object_type, id) {
            (Some(VM_INTERFACE_TYPE), Some(id)) => Assignment::VmInterface(id),
            (Some(object_type), Some(id)) => Assignment::Other {
                object_type: object_type.to_string(),
                id,
            },
            _ => Assignment::Unassigned,
        }
    }

    pub fn vm_interface(&self) -> Option<u64> {
        match self {
            Assignment::VmInterface(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VirtualDisk {
    pub id: u64,
    pub virtual_machine: NestedRef,
    pub name: String,
    /// Size in MB
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prefix {
    pub id: u64,
    pub prefix: String,
    #[serde(default)]
    pub vrf: Option<NestedRef>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

impl Prefix {
    /// Non-empty `dns_name` custom field.
    pub fn dns_name(&self) -> Option<&str> {
        self.custom_fields
            .get("dns_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub site: Option<NestedRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vlan {
    pub id: u64,
    pub vid: u16,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceRole {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub vm_role: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomField {
    pub id: u64,
    pub name: String,
}

/// Slug NetBox would derive for a role name.
pub fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

// NetBox renders decimals as numbers or strings depending on version.
fn de_opt_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

// =============================================================================
// CIDR helpers
// =============================================================================

/// Parse `addr/len`. A bare address gets a host-length prefix.
pub fn parse_cidr(raw: &str) -> Option<(IpAddr, u8)> {
    let (addr, len) = match raw.trim().split_once('/') {
        Some((addr, len)) => (addr.parse::<IpAddr>().ok()?, Some(len.parse::<u8>().ok()?)),
        None => (raw.trim().parse::<IpAddr>().ok()?, None),
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    let len = len.unwrap_or(max);
    (len <= max).then_some((addr, len))
}

/// Host part of an `addr/len` string.
pub fn cidr_host(raw: &str) -> Option<IpAddr> {
    parse_cidr(raw).map(|(addr, _)| addr)
}

/// Whether `addr` lies inside `network/len`.
pub fn cidr_contains(network: IpAddr, len: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - u32::from(len)) };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = if len == 0 { 0 } else { u128::MAX << (128 - u32::from(len)) };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// Longest prefix containing `addr`.
pub fn prefix_for(prefixes: &[Prefix], addr: IpAddr) -> Option<&Prefix> {
    prefixes
        .iter()
        .filter_map(|p| {
            let (net, len) = parse_cidr(&p.prefix)?;
            cidr_contains(net, len, addr).then_some((len, p))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_decoding_with_nested_fields() {
        let vm: VirtualMachine = serde_json::from_value(serde_json::json!({
            "id": 4,
            "name": "web01",
            "status": {"value": "active", "label": "Active"},
            "cluster": {"id": 1, "name": "pve"},
            "vcpus": "2.00",
            "memory": 2048,
            "custom_fields": {"autostart": true},
            "primary_ip4": null
        }))
        .unwrap();

        assert_eq!(vm.status_value(), Some("active"));
        assert_eq!(vm.cluster_id(), Some(1));
        assert_eq!(vm.vcpus, Some(2.0));
        assert!(vm.primary_ip4.is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let (net, len) = parse_cidr("10.0.0.0/8").unwrap();
        assert!(cidr_contains(net, len, "10.1.2.3".parse().unwrap()));
        assert!(!cidr_contains(net, len, "11.0.0.1".parse().unwrap()));

        let (net6, len6) = parse_cidr("2001:db8::/32").unwrap();
        assert!(cidr_contains(net6, len6, "2001:db8::5".parse().unwrap()));
        assert!(!cidr_contains(net6, len6, "10.1.2.3".parse().unwrap()));
        assert!(parse_cidr("10.0.0.1/33").is_none());
    }

    fn prefix(id: u64, cidr: &str, vrf: Option<u64>) -> Prefix {
        Prefix {
            id,
            prefix: cidr.into(),
            vrf: vrf.map(|id| NestedRef { id }),
            custom_fields: Map::new(),
        }
    }

    #[test]
    fn test_prefix_longest_match() {
        let prefixes = vec![
            prefix(1, "10.0.0.0/8", None),
            prefix(2, "10.20.0.0/16", Some(7)),
            prefix(3, "10.20.30.0/24", Some(9)),
        ];

        let id = |addr: &str| prefix_for(&prefixes, addr.parse().unwrap()).map(|p| p.id);
        assert_eq!(id("10.20.30.4"), Some(3));
        assert_eq!(id("10.20.1.1"), Some(2));
        assert_eq!(id("10.1.1.1"), Some(1));
        assert_eq!(id("192.168.1.1"), None);
    }

    #[test]
    fn test_assignment_classifies_foreign_objects() {
        let ip: IpAddress = serde_json::from_value(serde_json::json!({
            "id": 5,
            "address": "10.0.0.5/24",
            "assigned_object_type": "dcim.interface",
            "assigned_object_id": 77
        }))
        .unwrap();
        assert_eq!(
            ip.assignment(),
            Assignment::Other {
                object_type: "dcim.interface".to_string(),
                id: 77
            }
        );
        assert_eq!(ip.vm_interface(), None);

        assert_eq!(Assignment::of(Some(VM_INTERFACE_TYPE), Some(3)), Assignment::VmInterface(3));
        assert_eq!(Assignment::of(None, None), Assignment::Unassigned);
    }

    #[test]
    fn test_prefix_dns_name() {
        let mut p = prefix(1, "10.0.0.0/24", None);
        assert_eq!(p.dns_name(), None);
        p.custom_fields.insert("dns_name".into(), Value::String("lab.example".into()));
        assert_eq!(p.dns_name(), Some("lab.example"));
        p.custom_fields.insert("dns_name".into(), Value::Null);
        assert_eq!(p.dns_name(), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Virtual Machine"), "virtual-machine");
        assert_eq!(slugify("LXC"), "lxc");
    }
}
