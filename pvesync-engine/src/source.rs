//! Source snapshot builder.
//!
//! Lists nodes and guests, then fetches each enabled guest's config (and
//! guest-agent report when it can answer) and folds it into a
//! [`SourceEntity`].

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use pvesync_proxmox::parse::{self, normalize_mac};
use pvesync_proxmox::{AgentInterface, GuestConfig, GuestKind, GuestSummary, ProxmoxApi, ProxmoxError};

use crate::model::{DiskSpec, InterfaceSpec, PowerState, SourceEntity};
use crate::options::SyncOptions;
use crate::tracker::Fingerprint;

const MIB: u64 = 1024 * 1024;

/// Memory assumed for containers whose config omits it (Proxmox default).
const LXC_DEFAULT_MEMORY_MIB: u64 = 512;

/// A guest as listed on its node.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestRef {
    pub node: String,
    pub kind: GuestKind,
    pub summary: GuestSummary,
}

impl GuestRef {
    pub fn vmid(&self) -> u32 {
        self.summary.vmid
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.kind, &self.node, &self.summary)
    }
}

/// Replication, HA and pool membership, read once per pass.
#[derive(Debug, Clone, Default)]
pub struct GuestExtras {
    pub replicated: HashSet<u32>,
    pub ha: HashSet<u32>,
    pub pools: HashMap<u32, String>,
}

/// Result of a full source read.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Built entities, ordered by vmid
    pub entities: Vec<SourceEntity>,
    /// Every listed guest, enabled kinds or not
    pub listed: Vec<GuestRef>,
    /// Guests whose detail query failed
    pub skipped: Vec<u32>,
    /// Every resource pool, members or not
    pub pools: Vec<String>,
}

impl Snapshot {
    /// Names of every listed guest; cleanup never touches these.
    pub fn listed_names(&self) -> HashSet<String> {
        self.listed
            .iter()
            .map(|g| g.summary.display_name())
            .chain(self.entities.iter().map(|e| e.name.clone()))
            .collect()
    }
}

/// Builds [`SourceEntity`] records from a [`ProxmoxApi`].
pub struct SnapshotBuilder {
    api: Arc<dyn ProxmoxApi>,
    options: SyncOptions,
}

impl SnapshotBuilder {
    pub fn new(api: Arc<dyn ProxmoxApi>, options: SyncOptions) -> Self {
        Self { api, options }
    }

    fn kind_enabled(&self, kind: GuestKind) -> bool {
        match kind {
            GuestKind::Qemu => self.options.sync_vms,
            GuestKind::Lxc => self.options.sync_lxc,
        }
    }

    /// List guests on every node.
    ///
    /// Any listing failure fails the call: a partial listing would make
    /// present guests look deleted.
    #[instrument(skip(self))]
    pub async fn list_guests(&self, include_disabled: bool) -> Result<Vec<GuestRef>, ProxmoxError> {
        let nodes = self.api.list_nodes().await?;
        let mut guests = Vec::new();

        for node in nodes {
            for kind in [GuestKind::Qemu, GuestKind::Lxc] {
                if !include_disabled && !self.kind_enabled(kind) {
                    continue;
                }
                let listed = self.api.list_guests(kind, &node.node).await?;
                guests.extend(listed.into_iter().map(|summary| GuestRef {
                    node: node.node.clone(),
                    kind,
                    summary,
                }));
            }
        }

        guests.sort_by_key(GuestRef::vmid);
        debug!(count = guests.len(), "Listed guests");
        Ok(guests)
    }

    /// Replication/HA/pool data for `nodes`. Failures are logged and read as "none".
    pub async fn extras(&self, nodes: &HashSet<String>) -> GuestExtras {
        let mut extras = GuestExtras::default();

        for node in nodes {
            match self.api.replicated_guests(node).await {
                Ok(guests) => extras.replicated.extend(guests),
                Err(e) => warn!(node = %node, error = %e, "Failed to read replication jobs"),
            }
        }
        match self.api.ha_guests().await {
            Ok(guests) => extras.ha.extend(guests),
            Err(e) => warn!(error = %e, "Failed to read HA status"),
        }
        match self.api.guest_pools().await {
            Ok(members) => extras.pools.extend(members),
            Err(e) => warn!(error = %e, "Failed to read pool membership"),
        }

        extras
    }

    /// Every pool id. Failures are logged and read as "none".
    pub async fn pools(&self) -> Vec<String> {
        match self.api.list_pools().await {
            Ok(pools) => pools.into_iter().map(|p| p.poolid).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list pools");
                Vec::new()
            }
        }
    }

    /// Build every enabled guest.
    ///
    /// Guests whose detail queries fail are skipped; auth failures abort.
    #[instrument(skip(self))]
    pub async fn build(&self) -> Result<Snapshot, ProxmoxError> {
        let listed = self.list_guests(true).await?;
        let enabled: Vec<&GuestRef> = listed.iter().filter(|g| self.kind_enabled(g.kind)).collect();
        let nodes: HashSet<String> = enabled.iter().map(|g| g.node.clone()).collect();
        let extras = self.extras(&nodes).await;

        let owned: Vec<GuestRef> = enabled.into_iter().cloned().collect();
        let results: Vec<(u32, Result<SourceEntity, ProxmoxError>)> = stream::iter(owned)
            .map(|guest| {
                let extras = &extras;
                async move { (guest.vmid(), self.build_one(&guest, extras).await) }
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut snapshot = Snapshot {
            listed: listed.clone(),
            pools: self.pools().await,
            ..Snapshot::default()
        };
        for (vmid, result) in results {
            match result {
                Ok(entity) => snapshot.entities.push(entity),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(vmid, error = %e, "Skipping guest, failed to read its configuration");
                    snapshot.skipped.push(vmid);
                }
            }
        }
        snapshot.entities.sort_by_key(|e| e.vmid);
        snapshot.skipped.sort_unstable();

        info!(
            entities = snapshot.entities.len(),
            skipped = snapshot.skipped.len(),
            "Source snapshot built"
        );
        Ok(snapshot)
    }

    /// Build a single guest.
    #[instrument(skip(self, guest, extras), fields(vmid = guest.vmid(), kind = %guest.kind))]
    pub async fn build_one(&self, guest: &GuestRef, extras: &GuestExtras) -> Result<SourceEntity, ProxmoxError> {
        let config = self.api.guest_config(guest.kind, &guest.node, guest.vmid()).await?;

        let agent = match guest.kind {
            GuestKind::Qemu if guest.summary.status == "running" && parse::agent_enabled(&config) => {
                match self.api.agent_network_interfaces(&guest.node, guest.vmid()).await {
                    Ok(interfaces) => interfaces,
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "Guest agent query failed, syncing without addresses");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        Ok(assemble(guest, &config, &agent, extras))
    }
}

/// Fold listing row, config and agent report into an entity.
pub fn assemble(
    guest: &GuestRef,
    config: &GuestConfig,
    agent: &[AgentInterface],
    extras: &GuestExtras,
) -> SourceEntity {
    let vmid = guest.vmid();
    let (name, memory_mib, disks, interfaces) = match guest.kind {
        GuestKind::Qemu => (
            guest.summary.display_name(),
            parse::memory_mib(config, guest.summary.maxmem / MIB),
            parse::qemu_disks(config),
            qemu_interfaces(config, agent),
        ),
        GuestKind::Lxc => (
            config
                .get("hostname")
                .map(str::to_string)
                .unwrap_or_else(|| guest.summary.display_name()),
            parse::memory_mib(config, LXC_DEFAULT_MEMORY_MIB),
            parse::lxc_disks(config),
            lxc_interfaces(config),
        ),
    };

    SourceEntity {
        vmid,
        node: guest.node.clone(),
        kind: guest.kind,
        name,
        power: PowerState::parse(&guest.summary.status),
        memory_mib,
        vcpus: parse::vcpus(config),
        disks: disks
            .into_iter()
            .map(|d| DiskSpec {
                slot: d.slot,
                bus: d.bus,
                volume: d.volume,
                size_bytes: d.size_bytes,
                backup: d.backup,
            })
            .collect(),
        interfaces,
        autostart: parse::autostart(config),
        replicated: extras.replicated.contains(&vmid),
        ha: extras.ha.contains(&vmid),
        pool: extras.pools.get(&vmid).cloned(),
        fingerprint: guest.fingerprint(),
    }
}

// Agent data is matched to config NICs strictly by MAC; unmatched guest
// interfaces are ignored.
fn qemu_interfaces(config: &GuestConfig, agent: &[AgentInterface]) -> Vec<InterfaceSpec> {
    let by_mac: HashMap<String, &AgentInterface> = agent
        .iter()
        .filter(|iface| !parse::is_loopback_interface(iface))
        .filter_map(|iface| {
            let mac = normalize_mac(iface.hardware_address.as_deref()?)?;
            Some((mac, iface))
        })
        .collect();

    parse::qemu_nics(config)
        .into_iter()
        .map(|nic| {
            let reported = nic.mac.as_ref().and_then(|mac| by_mac.get(mac));
            InterfaceSpec {
                name: reported
                    .map(|iface| iface.name.clone())
                    .unwrap_or_else(|| nic.slot.clone()),
                addresses: reported.map(|iface| parse::agent_addresses(iface)).unwrap_or_default(),
                slot: nic.slot,
                mac: nic.mac,
                vlan: nic.vlan,
                mtu: nic.mtu,
            }
        })
        .collect()
}

fn lxc_interfaces(config: &GuestConfig) -> Vec<InterfaceSpec> {
    parse::lxc_nics(config)
        .into_iter()
        .map(|nic| InterfaceSpec {
            name: nic.name.clone().unwrap_or_else(|| nic.slot.clone()),
            slot: nic.slot,
            mac: nic.mac,
            vlan: nic.vlan,
            mtu: nic.mtu,
            addresses: nic.addresses,
        })
        .collect()
}
