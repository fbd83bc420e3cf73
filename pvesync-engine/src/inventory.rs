//! Target inventory cache.
//!
//! Loads the NetBox objects a pass needs with paged listings and indexes
//! them by the keys the planner joins on.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use tracing::{debug, info, instrument};

use pvesync_netbox::models::{
    cidr_host, Device, IpAddress, MacAddress, Prefix, Tag, VirtualDisk, VirtualMachine, Vlan, VmInterface,
};
use pvesync_netbox::{Endpoint, NetboxClient, Result};

use crate::model::{EntityKey, SourceEntity};

/// Indexed snapshot of the target.
///
/// `vms` holds every loaded VM; only those in `cluster` are in scope. VMs
/// outside the scope appear only as owners of contended identifiers.
#[derive(Debug, Clone, Default)]
pub struct TargetInventory {
    pub cluster: u64,
    pub vms: HashMap<u64, VirtualMachine>,
    pub interfaces: HashMap<u64, VmInterface>,
    pub disks: HashMap<u64, VirtualDisk>,
    pub addresses: HashMap<u64, IpAddress>,
    pub macs: HashMap<u64, MacAddress>,
    pub prefixes: Vec<Prefix>,
    pub vlans: HashMap<u16, u64>,
    /// Tag name → id
    pub tags: HashMap<String, u64>,
    /// Lower-cased device name → device
    pub devices: HashMap<String, Device>,
    by_key: HashMap<EntityKey, u64>,
}

impl TargetInventory {
    pub fn new(
        cluster: u64,
        vms: Vec<VirtualMachine>,
        interfaces: Vec<VmInterface>,
        disks: Vec<VirtualDisk>,
        addresses: Vec<IpAddress>,
        prefixes: Vec<Prefix>,
        vlans: Vec<Vlan>,
    ) -> Self {
        let mut inventory = Self {
            cluster,
            prefixes,
            ..Self::default()
        };
        for vm in vms {
            if vm.cluster_id() == Some(cluster) {
                inventory.by_key.insert(EntityKey::new(vm.name.clone(), cluster), vm.id);
            }
            inventory.vms.insert(vm.id, vm);
        }
        inventory.interfaces = interfaces.into_iter().map(|i| (i.id, i)).collect();
        inventory.addresses = addresses.into_iter().map(|a| (a.id, a)).collect();
        // Disks are only planned for in-scope VMs.
        inventory.disks = disks
            .into_iter()
            .filter(|d| inventory.in_scope(d.virtual_machine.id))
            .map(|d| (d.id, d))
            .collect();
        for vlan in vlans {
            inventory.vlans.entry(vlan.vid).or_insert(vlan.id);
        }
        inventory
    }

    pub fn with_macs(mut self, macs: Vec<MacAddress>) -> Self {
        self.macs = macs.into_iter().map(|m| (m.id, m)).collect();
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags.into_iter().map(|t| (t.name, t.id)).collect();
        self
    }

    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        for device in devices {
            if let Some(name) = device.name.as_deref().map(str::to_lowercase) {
                self.devices.entry(name).or_insert(device);
            }
        }
        self
    }

    /// Device standing for the Proxmox node `node`, matched case-insensitively.
    pub fn node_device(&self, node: &str) -> Option<&Device> {
        self.devices.get(&node.to_lowercase())
    }

    /// In-scope VM with this key.
    pub fn vm_by_key(&self, key: &EntityKey) -> Option<&VirtualMachine> {
        self.by_key.get(key).and_then(|id| self.vms.get(id))
    }

    pub fn in_scope(&self, vm: u64) -> bool {
        self.vms.get(&vm).is_some_and(|v| v.cluster_id() == Some(self.cluster))
    }

    /// In-scope VMs, ordered by id.
    pub fn scoped_vms(&self) -> Vec<&VirtualMachine> {
        let mut vms: Vec<&VirtualMachine> = self.by_key.values().filter_map(|id| self.vms.get(id)).collect();
        vms.sort_by_key(|vm| vm.id);
        vms
    }

    pub fn disks_of(&self, vm: u64) -> impl Iterator<Item = &VirtualDisk> {
        self.disks.values().filter(move |d| d.virtual_machine.id == vm)
    }
}

/// Loads [`TargetInventory`] snapshots through a [`NetboxClient`].
#[derive(Clone)]
pub struct InventoryLoader {
    client: NetboxClient,
    cluster: u64,
}

impl InventoryLoader {
    pub fn new(client: NetboxClient, cluster: u64) -> Self {
        Self { client, cluster }
    }

    /// Load everything a full pass needs.
    ///
    /// Interfaces, MACs and addresses are loaded unscoped so that
    /// identifiers held by VMs outside the cluster are still seen.
    #[instrument(skip(self), fields(cluster = self.cluster))]
    pub async fn load(&self) -> Result<TargetInventory> {
        let cluster_filter = [("cluster_id", self.cluster.to_string())];
        let (vms, interfaces, disks, addresses, macs, prefixes, vlans, tags, devices) = tokio::try_join!(
            self.client.list::<VirtualMachine>(Endpoint::VirtualMachines, &cluster_filter),
            self.client.list::<VmInterface>(Endpoint::VmInterfaces, &[]),
            self.client.list::<VirtualDisk>(Endpoint::VirtualDisks, &[]),
            self.client.list::<IpAddress>(Endpoint::IpAddresses, &[]),
            self.client.list::<MacAddress>(Endpoint::MacAddresses, &[]),
            self.client.list::<Prefix>(Endpoint::Prefixes, &[]),
            self.client.list::<Vlan>(Endpoint::Vlans, &[]),
            self.client.list::<Tag>(Endpoint::Tags, &[]),
            self.client.list::<Device>(Endpoint::Devices, &[]),
        )?;

        info!(
            vms = vms.len(),
            interfaces = interfaces.len(),
            disks = disks.len(),
            addresses = addresses.len(),
            macs = macs.len(),
            "Target inventory loaded"
        );
        Ok(TargetInventory::new(self.cluster, vms, interfaces, disks, addresses, prefixes, vlans)
            .with_macs(macs)
            .with_tags(tags)
            .with_devices(devices))
    }

    /// Load only what planning `entity` touches.
    #[instrument(skip(self, entity), fields(entity = %entity.name))]
    pub async fn load_one(&self, entity: &SourceEntity) -> Result<TargetInventory> {
        let vm_filters = [("name", entity.name.clone()), ("cluster_id", self.cluster.to_string())];
        let (mut vms, prefixes, vlans, tags, devices) = tokio::try_join!(
            self.client.list::<VirtualMachine>(Endpoint::VirtualMachines, &vm_filters),
            self.client.list::<Prefix>(Endpoint::Prefixes, &[]),
            self.client.list::<Vlan>(Endpoint::Vlans, &[]),
            self.list_by::<Tag>(Endpoint::Tags, "name", entity.pool_tag().into_iter()),
            self.list_by::<Device>(Endpoint::Devices, "name__ie", std::iter::once(entity.node.clone())),
        )?;

        let mut interfaces: HashMap<u64, VmInterface> = HashMap::new();
        let mut disks = Vec::new();
        if let Some(vm) = vms.first() {
            let owned = [("virtual_machine_id", vm.id.to_string())];
            let (own_interfaces, own_disks) = tokio::try_join!(
                self.client.list::<VmInterface>(Endpoint::VmInterfaces, &owned),
                self.client.list::<VirtualDisk>(Endpoint::VirtualDisks, &owned),
            )?;
            interfaces.extend(own_interfaces.into_iter().map(|i| (i.id, i)));
            disks = own_disks;
        }

        // MAC objects claimed by the entity or assigned to its interfaces.
        let own_ids: BTreeSet<String> = interfaces.keys().map(u64::to_string).collect();
        let wanted: BTreeSet<String> = entity.interfaces.iter().filter_map(|i| i.mac.clone()).collect();
        let (by_value, assigned_macs) = tokio::try_join!(
            self.list_by::<MacAddress>(Endpoint::MacAddresses, "mac_address", wanted.into_iter()),
            self.list_by::<MacAddress>(Endpoint::MacAddresses, "assigned_object_id", own_ids.clone().into_iter()),
        )?;
        let macs: HashMap<u64, MacAddress> = by_value.into_iter().chain(assigned_macs).map(|m| (m.id, m)).collect();

        let mut addresses: HashMap<u64, IpAddress> = HashMap::new();
        let hosts: BTreeSet<String> = entity
            .interfaces
            .iter()
            .flat_map(|i| i.addresses.iter())
            .filter_map(|raw| cidr_host(raw).map(|ip: IpAddr| ip.to_string()))
            .collect();
        let (assigned, claimed) = tokio::try_join!(
            self.list_by::<IpAddress>(Endpoint::IpAddresses, "assigned_object_id", own_ids.into_iter()),
            self.list_by::<IpAddress>(Endpoint::IpAddresses, "address", hosts.into_iter()),
        )?;
        addresses.extend(assigned.into_iter().chain(claimed).map(|a| (a.id, a)));

        // Interfaces holding claimed identifiers, then the VMs owning any foreign interface.
        let foreign: BTreeSet<String> = addresses
            .values()
            .filter_map(IpAddress::vm_interface)
            .chain(macs.values().filter_map(MacAddress::vm_interface))
            .filter(|id| !interfaces.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        let foreign_interfaces = self
            .list_by::<VmInterface>(Endpoint::VmInterfaces, "id", foreign.into_iter())
            .await?;
        interfaces.extend(foreign_interfaces.into_iter().map(|i| (i.id, i)));

        let known: HashSet<u64> = vms.iter().map(|vm| vm.id).collect();
        let owners: BTreeSet<String> = interfaces
            .values()
            .map(|i| i.virtual_machine.id)
            .filter(|id| !known.contains(id))
            .map(|id| id.to_string())
            .collect();
        vms.extend(self.list_by::<VirtualMachine>(Endpoint::VirtualMachines, "id", owners.into_iter()).await?);

        debug!(
            found = !known.is_empty(),
            interfaces = interfaces.len(),
            addresses = addresses.len(),
            macs = macs.len(),
            "Scoped target inventory loaded"
        );
        Ok(TargetInventory::new(
            self.cluster,
            vms,
            interfaces.into_values().collect(),
            disks,
            addresses.into_values().collect(),
            prefixes,
            vlans,
        )
        .with_macs(macs.into_values().collect())
        .with_tags(tags)
        .with_devices(devices))
    }

    /// List objects whose `field` matches any of `values`; no request when empty.
    async fn list_by<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        field: &'static str,
        values: impl Iterator<Item = String>,
    ) -> Result<Vec<T>> {
        let filters: Vec<(&str, String)> = values.map(|v| (field, v)).collect();
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        self.client.list(endpoint, &filters).await
    }
}
