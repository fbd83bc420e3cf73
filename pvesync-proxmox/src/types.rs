//! Wire types returned by the Proxmox VE API.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Cluster listings
// =============================================================================

/// A cluster node as returned by `GET /nodes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    /// Node name
    pub node: String,
    /// `online` / `offline`
    #[serde(default)]
    pub status: Option<String>,
}

impl NodeInfo {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            status: Some("online".to_string()),
        }
    }
}

/// Guest flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    /// QEMU virtual machine
    Qemu,
    /// LXC container
    Lxc,
}

impl GuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `GET /nodes/{node}/qemu` or `GET /nodes/{node}/lxc`.
///
/// Only cheap fields are kept; they feed the change fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestSummary {
    #[serde(deserialize_with = "de_vmid")]
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    /// `running`, `stopped`, `paused`, ...
    #[serde(default)]
    pub status: String,
    /// Configured memory in bytes
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub maxmem: u64,
    /// Root disk size in bytes
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub maxdisk: u64,
}

impl GuestSummary {
    pub fn new(vmid: u32, name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            vmid,
            name: Some(name.into()),
            status: status.into(),
            maxmem: 0,
            maxdisk: 0,
        }
    }

    /// Display name, falling back to the vmid.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.vmid.to_string(),
        }
    }
}

// =============================================================================
// Guest configuration
// =============================================================================

/// Guest configuration as returned by `GET /nodes/{node}/{kind}/{vmid}/config`.
///
/// Values are kept as strings; numbers and booleans are stringified on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuestConfig(BTreeMap<String, String>);

impl GuestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Integer value of `key`, if present and numeric.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }
}

impl<'de> Deserialize<'de> for GuestConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (key, value) in raw {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            map.insert(key, value);
        }
        Ok(GuestConfig(map))
    }
}

// =============================================================================
// Guest agent
// =============================================================================

/// Envelope of `GET .../agent/network-get-interfaces`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentNetworkResponse {
    #[serde(default)]
    pub result: Vec<AgentInterface>,
}

/// Interface as reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInterface {
    pub name: String,
    #[serde(rename = "hardware-address", default)]
    pub hardware_address: Option<String>,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<AgentIpAddress>,
}

/// Address entry reported by the guest agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIpAddress {
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    /// `ipv4` / `ipv6`
    #[serde(rename = "ip-address-type", default)]
    pub ip_address_type: String,
    #[serde(default)]
    pub prefix: Option<u8>,
}

// =============================================================================
// Replication / HA
// =============================================================================

/// One replication job from `GET /nodes/{node}/replication`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationJob {
    #[serde(deserialize_with = "de_vmid")]
    pub guest: u32,
}

/// One entry of `GET /cluster/ha/status/current`.
#[derive(Debug, Clone, Deserialize)]
pub struct HaStatusEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub sid: Option<String>,
}

impl HaStatusEntry {
    /// Guest id of a `service` entry (`vm:100` / `ct:101`).
    pub fn guest_id(&self) -> Option<u32> {
        if self.kind != "service" {
            return None;
        }
        let sid = self.sid.as_deref()?;
        let (_, id) = sid.split_once(':')?;
        id.parse().ok()
    }
}

// =============================================================================
// Pools
// =============================================================================

/// One entry of `GET /pools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub poolid: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// One row of `GET /cluster/resources?type=vm`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterResource {
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub pool: Option<String>,
}

// =============================================================================
// Lenient number decoding
// =============================================================================

// Older API versions return some numeric ids as strings.
fn de_vmid<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid vmid {}", n))),
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid vmid '{}'", s))),
        other => Err(serde::de::Error::custom(format!("invalid vmid {}", other))),
    }
}

fn de_u64_lenient<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    })
}
