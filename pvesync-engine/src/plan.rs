//! Reconciliation planner.
//!
//! Diffs source entities against a [`TargetInventory`] and emits an ordered
//! list of [`Operation`]s. Planning runs against a working copy of the
//! inventory that absorbs the effect of every operation already emitted,
//! so identifiers claimed earlier in the pass are seen by later entities.
//!
//! Per entity the order is: pool tag, VM, disks, then per interface the
//! interface itself, its MAC object and its addresses, and finally the
//! VM's primary IPs.

use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

use pvesync_netbox::models::{
    cidr_host, parse_cidr, prefix_for, Assignment, Prefix, VirtualMachine, VM_INTERFACE_TYPE,
};
use pvesync_netbox::Endpoint;
use pvesync_proxmox::parse::normalize_mac;

use crate::conflict::{resolve, Conflict, IdentifierKind, OwnerStatus, Resolution};
use crate::inventory::TargetInventory;
use crate::model::{pool_tag_name, pool_tag_slug, EntityKey, InterfaceSpec, SourceEntity, POOL_TAG_PREFIX};
use crate::provision::RoleIds;

/// Symbolic reference to a target object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ref {
    /// Object that exists in NetBox
    Existing(u64),
    /// Object created by an earlier operation of the same plan
    Pending(usize),
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Existing(id) => write!(f, "#{}", id),
            Ref::Pending(n) => write!(f, "pending-{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    VirtualMachine,
    Interface,
    Disk,
    IpAddress,
    MacAddress,
    Vlan,
    Tag,
}

impl ObjectType {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            ObjectType::VirtualMachine => Endpoint::VirtualMachines,
            ObjectType::Interface => Endpoint::VmInterfaces,
            ObjectType::Disk => Endpoint::VirtualDisks,
            ObjectType::IpAddress => Endpoint::IpAddresses,
            ObjectType::MacAddress => Endpoint::MacAddresses,
            ObjectType::Vlan => Endpoint::Vlans,
            ObjectType::Tag => Endpoint::Tags,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::VirtualMachine => "virtual_machine",
            ObjectType::Interface => "interface",
            ObjectType::Disk => "disk",
            ObjectType::IpAddress => "ip_address",
            ObjectType::MacAddress => "mac_address",
            ObjectType::Vlan => "vlan",
            ObjectType::Tag => "tag",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create; the new id is published as `Ref::Pending(pending)`
    Create { pending: usize },
    Update { target: Ref },
    Delete { id: u64 },
}

/// One mutation against the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub action: Action,
    pub object: ObjectType,
    /// Name of the source entity (target VM for cleanup, tag for pools) this serves
    pub entity: String,
    /// Literal fields
    pub body: Map<String, Value>,
    /// Fields filled with resolved ids at apply time
    pub refs: Vec<(&'static str, Ref)>,
}

impl Operation {
    pub fn is_create(&self) -> bool {
        matches!(self.action, Action::Create { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self.action, Action::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.action, Action::Delete { .. })
    }

    /// Whether the operation writes `field`, literally or by reference.
    pub fn sets(&self, field: &str) -> bool {
        self.body.contains_key(field) || self.refs.iter().any(|(name, _)| *name == field)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Action::Create { .. } => write!(f, "create {}", self.object),
            Action::Update { target } => write!(f, "update {} {}", self.object, target),
            Action::Delete { id } => write!(f, "delete {} #{}", self.object, id),
        }
    }
}

/// Ordered operations plus the conflicts met while planning them.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub conflicts: Vec<Conflict>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Operations on `object` for which `filter` holds.
    pub fn count(&self, object: ObjectType, filter: impl Fn(&Operation) -> bool) -> usize {
        self.operations
            .iter()
            .filter(|op| op.object == object && filter(op))
            .count()
    }
}

/// Plan a set of entities in order.
pub fn plan(entities: &[SourceEntity], inventory: &TargetInventory, roles: RoleIds) -> Plan {
    let mut planner = Planner::new(inventory, roles);
    for entity in entities {
        planner.plan_entity(entity);
    }
    planner.finish()
}

// =============================================================================
// Working state
// =============================================================================

/// What an address or MAC object is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Holder {
    Free,
    Interface(Ref),
    /// Any object that is not a VM interface, e.g. `dcim.interface 77`
    Foreign(String),
}

impl Holder {
    fn of(assignment: Assignment) -> Self {
        match assignment {
            Assignment::Unassigned => Holder::Free,
            Assignment::VmInterface(id) => Holder::Interface(Ref::Existing(id)),
            Assignment::Other { object_type, id } => Holder::Foreign(format!("{} {}", object_type, id)),
        }
    }
}

#[derive(Debug, Clone)]
struct VmState {
    name: String,
    status: OwnerStatus,
    primary_ip4: Option<Ref>,
    primary_ip6: Option<Ref>,
}

#[derive(Debug, Clone)]
struct InterfaceState {
    vm: Ref,
    name: String,
    primary_mac: Option<Ref>,
    mtu: Option<u32>,
    mode: Option<String>,
    untagged_vlan: Option<Ref>,
}

#[derive(Debug, Clone)]
struct AddressState {
    address: String,
    holder: Holder,
    dns_name: String,
}

#[derive(Debug, Default)]
struct WorkingState {
    vms: HashMap<Ref, VmState>,
    by_name: HashMap<String, Ref>,
    interfaces: HashMap<Ref, InterfaceState>,
    /// Normalized MAC → MAC object
    macs: HashMap<String, Ref>,
    mac_holders: HashMap<Ref, Holder>,
    addresses: HashMap<Ref, AddressState>,
    /// `(host, vrf)` → address
    address_index: HashMap<(IpAddr, Option<u64>), Ref>,
    vlans: HashMap<u16, Ref>,
    tags: HashMap<String, Ref>,
    next_pending: usize,
}

impl WorkingState {
    fn from_inventory(inventory: &TargetInventory) -> Self {
        let mut state = WorkingState::default();

        for vm in inventory.vms.values() {
            let status = if inventory.in_scope(vm.id) {
                OwnerStatus::from_target_status(vm.status_value())
            } else {
                OwnerStatus::Unknown
            };
            state.vms.insert(
                Ref::Existing(vm.id),
                VmState {
                    name: vm.name.clone(),
                    status,
                    primary_ip4: vm.primary_ip4.map(|r| Ref::Existing(r.id)),
                    primary_ip6: vm.primary_ip6.map(|r| Ref::Existing(r.id)),
                },
            );
        }
        for vm in inventory.scoped_vms() {
            state.by_name.entry(vm.name.clone()).or_insert(Ref::Existing(vm.id));
        }

        for (id, iface) in &inventory.interfaces {
            state.interfaces.insert(
                Ref::Existing(*id),
                InterfaceState {
                    vm: Ref::Existing(iface.virtual_machine.id),
                    name: iface.name.clone(),
                    primary_mac: iface.primary_mac_address.map(|m| Ref::Existing(m.id)),
                    mtu: iface.mtu,
                    mode: iface.mode.as_ref().map(|m| m.value.clone()),
                    untagged_vlan: iface.untagged_vlan.map(|v| Ref::Existing(v.id)),
                },
            );
        }

        // Lowest id wins when NetBox holds duplicates.
        let mut mac_ids: Vec<u64> = inventory.macs.keys().copied().collect();
        mac_ids.sort_unstable();
        for id in mac_ids {
            let Some(mac) = inventory.macs.get(&id) else { continue };
            let Some(normalized) = normalize_mac(&mac.mac_address) else { continue };
            state.macs.entry(normalized).or_insert(Ref::Existing(id));
            state.mac_holders.insert(Ref::Existing(id), Holder::of(mac.assignment()));
        }

        let mut address_ids: Vec<u64> = inventory.addresses.keys().copied().collect();
        address_ids.sort_unstable();
        for id in address_ids {
            let Some(address) = inventory.addresses.get(&id) else { continue };
            let Some(host) = cidr_host(&address.address) else { continue };
            state
                .address_index
                .entry((host, address.vrf.map(|v| v.id)))
                .or_insert(Ref::Existing(id));
            state.addresses.insert(
                Ref::Existing(id),
                AddressState {
                    address: address.address.clone(),
                    holder: Holder::of(address.assignment()),
                    dns_name: address.dns_name.clone(),
                },
            );
        }

        state.vlans = inventory.vlans.iter().map(|(vid, id)| (*vid, Ref::Existing(*id))).collect();
        state.tags = inventory.tags.iter().map(|(name, id)| (name.clone(), Ref::Existing(*id))).collect();
        state
    }

    fn pending(&mut self) -> usize {
        let n = self.next_pending;
        self.next_pending += 1;
        n
    }

    fn vm_status(&self, vm: Ref) -> OwnerStatus {
        self.vms.get(&vm).map(|v| v.status).unwrap_or(OwnerStatus::Unknown)
    }

    fn vm_name(&self, vm: Ref) -> String {
        self.vms
            .get(&vm)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| format!("VM {}", vm))
    }

    /// Interfaces of `vm`, in creation order.
    fn interfaces_of(&self, vm: Ref) -> Vec<Ref> {
        let mut refs: Vec<Ref> = self
            .interfaces
            .iter()
            .filter(|(_, iface)| iface.vm == vm)
            .map(|(r, _)| *r)
            .collect();
        refs.sort_unstable();
        refs
    }

    /// Interface the MAC object for `mac` is attached to.
    fn mac_interface(&self, mac: &str) -> Option<Ref> {
        let object = self.macs.get(mac)?;
        match self.mac_holders.get(object) {
            Some(Holder::Interface(iface)) => Some(*iface),
            _ => None,
        }
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Incremental planner over one pass.
pub struct Planner<'a> {
    inventory: &'a TargetInventory,
    roles: RoleIds,
    /// Names the source lists this pass, when known
    listed: Option<&'a HashSet<String>>,
    /// Nodes already reported as having no device
    missing_nodes: HashSet<String>,
    state: WorkingState,
    plan: Plan,
}

impl<'a> Planner<'a> {
    pub fn new(inventory: &'a TargetInventory, roles: RoleIds) -> Self {
        Self {
            inventory,
            roles,
            listed: None,
            missing_nodes: HashSet::new(),
            state: WorkingState::from_inventory(inventory),
            plan: Plan::default(),
        }
    }

    /// Names of every guest the source lists. Conflicting owners missing
    /// from it are flagged as stale.
    pub fn with_listing(mut self, listed: &'a HashSet<String>) -> Self {
        self.listed = Some(listed);
        self
    }

    pub fn finish(self) -> Plan {
        self.plan
    }

    /// Ensure a tag exists for every pool, members or not.
    pub fn plan_pools(&mut self, pools: &[String]) {
        for pool in pools {
            self.ensure_pool_tag(pool);
        }
    }

    pub fn plan_entity(&mut self, entity: &SourceEntity) {
        let key = entity.key(self.inventory.cluster);
        let before = self.plan.operations.len();

        if let Some(pool) = &entity.pool {
            self.ensure_pool_tag(pool);
        }
        let vm = self.plan_vm(entity);
        self.plan_disks(entity, vm);

        let mut primary: Option<Vec<(IpAddr, Option<Ref>)>> = None;
        let primary_index = entity.primary_interface();
        let matches = self.match_interfaces(vm, &entity.interfaces);
        for (index, (spec, candidate)) in entity.interfaces.iter().zip(matches).enumerate() {
            let iface = self.plan_interface(entity, vm, spec, candidate);
            if let Some(mac) = &spec.mac {
                self.plan_mac(entity, &key, vm, iface, mac);
            }
            let assigned = self.plan_addresses(entity, &key, vm, iface, spec);
            if Some(index) == primary_index {
                primary = Some(assigned);
            }
        }
        if let Some(assigned) = primary {
            self.plan_primary_ips(entity, vm, &assigned);
        }

        debug!(
            entity = %key,
            operations = self.plan.operations.len() - before,
            "Entity planned"
        );
    }

    fn emit(&mut self, served: &str, action: Action, object: ObjectType, body: Value, refs: Vec<(&'static str, Ref)>) {
        let body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let operation = Operation {
            action,
            object,
            entity: served.to_string(),
            body,
            refs,
        };
        debug!(entity = %served, operation = %operation, "Planned");
        self.plan.operations.push(operation);
    }

    fn create(&mut self, served: &str, object: ObjectType, body: Value, refs: Vec<(&'static str, Ref)>) -> Ref {
        let pending = self.state.pending();
        self.emit(served, Action::Create { pending }, object, body, refs);
        Ref::Pending(pending)
    }

    fn update(&mut self, served: &str, object: ObjectType, target: Ref, body: Map<String, Value>, refs: Vec<(&'static str, Ref)>) {
        if body.is_empty() && refs.is_empty() {
            return;
        }
        self.emit(served, Action::Update { target }, object, Value::Object(body), refs);
    }

    fn record_conflict(&mut self, conflict: Conflict) {
        error!(
            kind = %conflict.kind,
            identifier = %conflict.identifier,
            entity = %conflict.entity,
            owner = %conflict.owner_name,
            owner_status = %conflict.owner_status,
            "Identifier conflict, assignment skipped"
        );
        if conflict.owner_stale {
            warn!(
                owner = %conflict.owner_name,
                owner_id = ?conflict.owner_id,
                "Owner is no longer listed in Proxmox; if the guest was renamed or removed, enable cleanup or delete the stale NetBox VM"
            );
        }
        self.plan.conflicts.push(conflict);
    }

    /// Whether `vm` may take an identifier from `holder`. Records a
    /// conflict when it may not.
    fn may_take(&mut self, kind: IdentifierKind, identifier: &str, key: &EntityKey, vm: Ref, holder: &Holder) -> bool {
        let (owner_vm, owner_name, owner_interface) = match holder {
            Holder::Free => return true,
            Holder::Interface(iface) => match self.state.interfaces.get(iface) {
                Some(state) if state.vm == vm => return true,
                Some(state) => (Some(state.vm), self.state.vm_name(state.vm), state.name.clone()),
                None => (None, "unknown".to_string(), iface.to_string()),
            },
            Holder::Foreign(object) => (None, object.clone(), object.clone()),
        };

        let owner_status = owner_vm.map_or(OwnerStatus::Unknown, |o| self.state.vm_status(o));
        if resolve(owner_status, self.state.vm_status(vm)) == Resolution::Reassign {
            info!(
                kind = %kind,
                identifier = %identifier,
                entity = %key,
                from = %owner_name,
                "Reassigning identifier from offline VM"
            );
            return true;
        }

        let owner_id = owner_vm.and_then(existing_id);
        let owner_stale = owner_status != OwnerStatus::Unknown
            && owner_id.is_some()
            && self.listed.is_some_and(|listed| !listed.contains(&owner_name));
        self.record_conflict(Conflict {
            kind,
            identifier: identifier.to_string(),
            entity: key.clone(),
            owner_name,
            owner_id,
            owner_status,
            owner_interface,
            owner_stale,
        });
        false
    }

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    fn ensure_pool_tag(&mut self, pool: &str) {
        let name = pool_tag_name(pool);
        if self.state.tags.contains_key(&name) {
            return;
        }
        info!(pool = %pool, "New pool tag");
        let tag = self.create(
            &name,
            ObjectType::Tag,
            json!({
                "name": name,
                "slug": pool_tag_slug(pool),
                "description": format!("Proxmox pool {}", pool),
            }),
            Vec::new(),
        );
        self.state.tags.insert(name, tag);
    }

    // -------------------------------------------------------------------------
    // Virtual machine
    // -------------------------------------------------------------------------

    fn plan_vm(&mut self, entity: &SourceEntity) -> Ref {
        let fields = self.vm_fields(entity);
        let planned_status = OwnerStatus::from_target_status(Some(fields.status));

        let existing = self.state.by_name.get(&entity.name).copied();
        let vm = match existing {
            Some(Ref::Existing(id)) => {
                let changes = self
                    .inventory
                    .vms
                    .get(&id)
                    .map(|current| fields.changes(current))
                    .unwrap_or_default();
                self.update(&entity.name, ObjectType::VirtualMachine, Ref::Existing(id), changes, Vec::new());
                Ref::Existing(id)
            }
            Some(pending) => {
                // Same name twice in one pass; the later guest wins.
                if let Value::Object(map) = fields.body(self.inventory.cluster) {
                    self.update(&entity.name, ObjectType::VirtualMachine, pending, map, Vec::new());
                }
                pending
            }
            None => {
                info!(entity = %entity.name, vmid = entity.vmid, "New virtual machine");
                let vm = self.create(
                    &entity.name,
                    ObjectType::VirtualMachine,
                    fields.body(self.inventory.cluster),
                    Vec::new(),
                );
                self.state.by_name.insert(entity.name.clone(), vm);
                vm
            }
        };

        let state = self.state.vms.entry(vm).or_insert_with(|| VmState {
            name: entity.name.clone(),
            status: planned_status,
            primary_ip4: None,
            primary_ip6: None,
        });
        state.status = planned_status;
        vm
    }

    fn vm_fields<'e>(&mut self, entity: &'e SourceEntity) -> VmFields<'e> {
        let inventory = self.inventory;
        let device = inventory.node_device(&entity.node);
        if device.is_none() && self.missing_nodes.insert(entity.node.clone()) {
            warn!(node = %entity.node, "No NetBox device matches the Proxmox node, guests on it get no device or site");
        }
        VmFields {
            entity,
            status: entity.power.target_status(),
            role: self.roles.for_kind(entity.kind),
            serial: entity.vmid.to_string(),
            custom_fields: json!({
                "autostart": entity.autostart,
                "replicated": entity.replicated,
                "ha": entity.ha,
            }),
            device: device.map(|d| d.id),
            site: device.and_then(|d| d.site).map(|s| s.id),
            pool_tag: entity.pool_tag(),
        }
    }

    // -------------------------------------------------------------------------
    // Disks
    // -------------------------------------------------------------------------

    fn plan_disks(&mut self, entity: &SourceEntity, vm: Ref) {
        let existing: HashMap<String, (u64, u64, String, Option<Value>)> = match vm {
            Ref::Existing(id) => self
                .inventory
                .disks_of(id)
                .map(|d| {
                    (
                        d.name.clone(),
                        (d.id, d.size, d.description.clone(), d.custom_fields.get("backup").cloned()),
                    )
                })
                .collect(),
            Ref::Pending(_) => HashMap::new(),
        };

        for disk in &entity.disks {
            let size = disk.size_mb();
            let description = disk.description();
            match existing.get(&disk.slot) {
                None => {
                    self.create(
                        &entity.name,
                        ObjectType::Disk,
                        json!({
                            "name": disk.slot,
                            "size": size,
                            "description": description,
                            "custom_fields": {"backup": disk.backup},
                        }),
                        vec![("virtual_machine", vm)],
                    );
                }
                Some((id, current_size, current_description, current_backup)) => {
                    let mut changes = Map::new();
                    if *current_size != size {
                        changes.insert("size".into(), json!(size));
                    }
                    if *current_description != description {
                        changes.insert("description".into(), json!(description));
                    }
                    if current_backup.as_ref() != Some(&Value::Bool(disk.backup)) {
                        changes.insert("custom_fields".into(), json!({"backup": disk.backup}));
                    }
                    self.update(&entity.name, ObjectType::Disk, Ref::Existing(*id), changes, Vec::new());
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Interfaces
    // -------------------------------------------------------------------------

    fn plan_interface(&mut self, entity: &SourceEntity, vm: Ref, spec: &InterfaceSpec, candidate: Option<Ref>) -> Ref {
        let vlan = spec.vlan.map(|vid| self.ensure_vlan(entity, vid));

        match candidate {
            None => {
                let mut body = json!({"name": spec.name});
                if let Some(mtu) = spec.mtu {
                    body["mtu"] = json!(mtu);
                }
                let mut refs = vec![("virtual_machine", vm)];
                if let Some(vlan) = vlan {
                    body["mode"] = json!("access");
                    refs.push(("untagged_vlan", vlan));
                }
                let iface = self.create(&entity.name, ObjectType::Interface, body, refs);
                self.state.interfaces.insert(
                    iface,
                    InterfaceState {
                        vm,
                        name: spec.name.clone(),
                        primary_mac: None,
                        mtu: spec.mtu,
                        mode: vlan.map(|_| "access".to_string()),
                        untagged_vlan: vlan,
                    },
                );
                iface
            }
            Some(iface) => {
                let mut changes = Map::new();
                let mut refs = Vec::new();
                if let Some(current) = self.state.interfaces.get_mut(&iface) {
                    if current.name != spec.name {
                        changes.insert("name".into(), json!(spec.name));
                        current.name = spec.name.clone();
                    }
                    if spec.mtu.is_some() && current.mtu != spec.mtu {
                        changes.insert("mtu".into(), json!(spec.mtu));
                        current.mtu = spec.mtu;
                    }
                    if let Some(vlan) = vlan {
                        if current.mode.as_deref() != Some("access") {
                            changes.insert("mode".into(), json!("access"));
                            current.mode = Some("access".to_string());
                        }
                        if current.untagged_vlan != Some(vlan) {
                            refs.push(("untagged_vlan", vlan));
                            current.untagged_vlan = Some(vlan);
                        }
                    }
                }
                self.update(&entity.name, ObjectType::Interface, iface, changes, refs);
                iface
            }
        }
    }

    /// Pair each spec with an own interface: by MAC across all specs first,
    /// then by name or slot among the interfaces left over.
    fn match_interfaces(&self, vm: Ref, specs: &[InterfaceSpec]) -> Vec<Option<Ref>> {
        let own: HashSet<Ref> = self.state.interfaces_of(vm).into_iter().collect();
        let mut taken: HashSet<Ref> = HashSet::new();
        let mut matches: Vec<Option<Ref>> = vec![None; specs.len()];

        for (index, spec) in specs.iter().enumerate() {
            let Some(mac) = &spec.mac else { continue };
            let found = self
                .state
                .mac_interface(mac)
                .filter(|r| own.contains(r) && !taken.contains(r));
            if let Some(found) = found {
                taken.insert(found);
                matches[index] = Some(found);
            }
        }

        let mut own: Vec<Ref> = own.into_iter().collect();
        own.sort_unstable();
        for (index, spec) in specs.iter().enumerate() {
            if matches[index].is_some() {
                continue;
            }
            let found = [&spec.name, &spec.slot].into_iter().find_map(|name| {
                own.iter().copied().find(|r| {
                    !taken.contains(r) && self.state.interfaces.get(r).is_some_and(|i| &i.name == name)
                })
            });
            if let Some(found) = found {
                taken.insert(found);
                matches[index] = Some(found);
            }
        }

        matches
    }

    /// Attach the MAC object for `mac` to `iface` and make it the
    /// interface's primary MAC. A MAC held elsewhere is taken only from
    /// this VM or an offline one.
    fn plan_mac(&mut self, entity: &SourceEntity, key: &EntityKey, vm: Ref, iface: Ref, mac: &str) {
        let object = match self.state.macs.get(mac).copied() {
            None => {
                let object = self.create(
                    &entity.name,
                    ObjectType::MacAddress,
                    json!({"mac_address": mac, "assigned_object_type": VM_INTERFACE_TYPE}),
                    vec![("assigned_object_id", iface)],
                );
                self.state.macs.insert(mac.to_string(), object);
                object
            }
            Some(object) => {
                let holder = self.state.mac_holders.get(&object).cloned().unwrap_or(Holder::Free);
                if holder != Holder::Interface(iface) {
                    if !self.may_take(IdentifierKind::MacAddress, mac, key, vm, &holder) {
                        return;
                    }
                    if let Holder::Interface(previous) = holder {
                        self.release_mac(entity, previous, object);
                    }
                    let mut changes = Map::new();
                    changes.insert("assigned_object_type".into(), json!(VM_INTERFACE_TYPE));
                    self.update(&entity.name, ObjectType::MacAddress, object, changes, vec![("assigned_object_id", iface)]);
                }
                object
            }
        };
        self.state.mac_holders.insert(object, Holder::Interface(iface));

        let displaced = match self.state.interfaces.get_mut(&iface) {
            Some(state) if state.primary_mac == Some(object) => return,
            Some(state) => state.primary_mac.replace(object),
            None => None,
        };
        self.update(&entity.name, ObjectType::Interface, iface, Map::new(), vec![("primary_mac_address", object)]);

        // The guest's MAC changed; free the old one so other guests can claim it.
        if let Some(old) = displaced {
            let mut unassign = Map::new();
            unassign.insert("assigned_object_type".into(), Value::Null);
            unassign.insert("assigned_object_id".into(), Value::Null);
            self.update(&entity.name, ObjectType::MacAddress, old, unassign, Vec::new());
            self.state.mac_holders.insert(old, Holder::Free);
        }
    }

    /// Clear `iface`'s primary MAC if it is `object`.
    fn release_mac(&mut self, entity: &SourceEntity, iface: Ref, object: Ref) {
        let Some(state) = self.state.interfaces.get_mut(&iface) else { return };
        if state.primary_mac != Some(object) {
            return;
        }
        state.primary_mac = None;
        let mut clear = Map::new();
        clear.insert("primary_mac_address".into(), Value::Null);
        self.update(&entity.name, ObjectType::Interface, iface, clear, Vec::new());
    }

    fn ensure_vlan(&mut self, entity: &SourceEntity, vid: u16) -> Ref {
        if let Some(vlan) = self.state.vlans.get(&vid) {
            return *vlan;
        }
        let vlan = self.create(
            &entity.name,
            ObjectType::Vlan,
            json!({"vid": vid, "name": format!("VLAN {}", vid), "status": "active"}),
            Vec::new(),
        );
        self.state.vlans.insert(vid, vlan);
        vlan
    }

    // -------------------------------------------------------------------------
    // IP addresses
    // -------------------------------------------------------------------------

    /// Plan the addresses of one interface. Returns each address with the
    /// object it ends up assigned as, `None` when it lost a conflict.
    fn plan_addresses(
        &mut self,
        entity: &SourceEntity,
        key: &EntityKey,
        vm: Ref,
        iface: Ref,
        spec: &InterfaceSpec,
    ) -> Vec<(IpAddr, Option<Ref>)> {
        let mut assigned = Vec::new();

        for (host, len, _) in spec.parsed_addresses() {
            let prefix = prefix_for(&self.inventory.prefixes, host);
            let vrf = prefix.and_then(|p| p.vrf.map(|v| v.id));
            let dns_name = prefix.and_then(Prefix::dns_name).map(|zone| format!("{}.{}", entity.name, zone));
            let address = format!("{}/{}", host, len);

            let Some(existing) = self.state.address_index.get(&(host, vrf)).copied() else {
                let mut body = json!({
                    "address": address,
                    "status": "active",
                    "assigned_object_type": VM_INTERFACE_TYPE,
                });
                if let Some(vrf) = vrf {
                    body["vrf"] = json!(vrf);
                }
                if let Some(dns_name) = &dns_name {
                    body["dns_name"] = json!(dns_name);
                }
                let created = self.create(&entity.name, ObjectType::IpAddress, body, vec![("assigned_object_id", iface)]);
                self.state.address_index.insert((host, vrf), created);
                self.state.addresses.insert(
                    created,
                    AddressState {
                        address,
                        holder: Holder::Interface(iface),
                        dns_name: dns_name.unwrap_or_default(),
                    },
                );
                assigned.push((host, Some(created)));
                continue;
            };

            let current = self.state.addresses.get(&existing).cloned();
            let holder = current.as_ref().map_or(Holder::Free, |c| c.holder.clone());
            let mask_differs = current
                .as_ref()
                .and_then(|c| parse_cidr(&c.address))
                .map_or(true, |(_, current_len)| current_len != len);

            if holder != Holder::Interface(iface) && !self.may_take(IdentifierKind::IpAddress, &address, key, vm, &holder) {
                assigned.push((host, None));
                continue;
            }

            let mut changes = Map::new();
            if mask_differs {
                changes.insert("address".into(), json!(address));
            }
            if let Some(dns_name) = dns_name.as_ref().filter(|d| current.as_ref().map(|c| &c.dns_name) != Some(*d)) {
                changes.insert("dns_name".into(), json!(dns_name));
            }
            let mut refs = Vec::new();
            if holder != Holder::Interface(iface) {
                if let Holder::Interface(previous) = holder {
                    if let Some(owner_vm) = self.state.interfaces.get(&previous).map(|i| i.vm) {
                        self.release_primary(entity, owner_vm, existing);
                    }
                }
                changes.insert("assigned_object_type".into(), json!(VM_INTERFACE_TYPE));
                refs.push(("assigned_object_id", iface));
            }
            self.update(&entity.name, ObjectType::IpAddress, existing, changes, refs);

            if let Some(state) = self.state.addresses.get_mut(&existing) {
                state.address = address;
                state.holder = Holder::Interface(iface);
                if let Some(dns_name) = dns_name {
                    state.dns_name = dns_name;
                }
            }
            assigned.push((host, Some(existing)));
        }

        assigned
    }

    /// Clear `vm`'s primary IPs that point at `address`.
    fn release_primary(&mut self, entity: &SourceEntity, vm: Ref, address: Ref) {
        let Some(state) = self.state.vms.get_mut(&vm) else { return };
        let mut changes = Map::new();
        if state.primary_ip4 == Some(address) {
            changes.insert("primary_ip4".into(), Value::Null);
            state.primary_ip4 = None;
        }
        if state.primary_ip6 == Some(address) {
            changes.insert("primary_ip6".into(), Value::Null);
            state.primary_ip6 = None;
        }
        self.update(&entity.name, ObjectType::VirtualMachine, vm, changes, Vec::new());
    }

    fn plan_primary_ips(&mut self, entity: &SourceEntity, vm: Ref, assigned: &[(IpAddr, Option<Ref>)]) {
        let first_v4 = assigned.iter().find(|(ip, _)| ip.is_ipv4()).and_then(|(_, r)| *r);
        let first_v6 = assigned.iter().find(|(ip, _)| ip.is_ipv6()).and_then(|(_, r)| *r);
        let Some(state) = self.state.vms.get_mut(&vm) else { return };

        let mut refs = Vec::new();
        if let Some(v4) = first_v4.filter(|v4| state.primary_ip4 != Some(*v4)) {
            refs.push(("primary_ip4", v4));
            state.primary_ip4 = Some(v4);
        }
        if let Some(v6) = first_v6.filter(|v6| state.primary_ip6 != Some(*v6)) {
            refs.push(("primary_ip6", v6));
            state.primary_ip6 = Some(v6);
        }
        self.update(&entity.name, ObjectType::VirtualMachine, vm, Map::new(), refs);
    }
}

fn existing_id(r: Ref) -> Option<u64> {
    match r {
        Ref::Existing(id) => Some(id),
        Ref::Pending(_) => None,
    }
}

/// Desired VM fields for one entity.
struct VmFields<'e> {
    entity: &'e SourceEntity,
    status: &'static str,
    role: Option<u64>,
    serial: String,
    custom_fields: Value,
    device: Option<u64>,
    site: Option<u64>,
    pool_tag: Option<String>,
}

impl VmFields<'_> {
    fn body(&self, cluster: u64) -> Value {
        let mut body = json!({
            "name": self.entity.name,
            "cluster": cluster,
            "status": self.status,
            "vcpus": self.entity.vcpus,
            "memory": self.entity.memory_mib,
            "serial": self.serial,
            "custom_fields": self.custom_fields,
        });
        if let Some(role) = self.role {
            body["role"] = json!(role);
        }
        if let Some(device) = self.device {
            body["device"] = json!(device);
        }
        if let Some(site) = self.site {
            body["site"] = json!(site);
        }
        if let Some(tag) = &self.pool_tag {
            body["tags"] = json!([{"name": tag}]);
        }
        body
    }

    fn changes(&self, current: &VirtualMachine) -> Map<String, Value> {
        let mut changes = Map::new();
        if current.status_value() != Some(self.status) {
            changes.insert("status".into(), json!(self.status));
        }
        if let Some(role) = self.role.filter(|r| current.role.map(|c| c.id) != Some(*r)) {
            changes.insert("role".into(), json!(role));
        }
        if current
            .vcpus
            .map_or(true, |v| (v - f64::from(self.entity.vcpus)).abs() > 0.001)
        {
            changes.insert("vcpus".into(), json!(self.entity.vcpus));
        }
        if current.memory != Some(self.entity.memory_mib) {
            changes.insert("memory".into(), json!(self.entity.memory_mib));
        }
        if current.serial.as_deref() != Some(self.serial.as_str()) {
            changes.insert("serial".into(), json!(self.serial));
        }
        let fields_differ = self
            .custom_fields
            .as_object()
            .is_some_and(|wanted| wanted.iter().any(|(k, v)| current.custom_fields.get(k) != Some(v)));
        if fields_differ {
            changes.insert("custom_fields".into(), self.custom_fields.clone());
        }
        if let Some(device) = self.device.filter(|d| current.device.map(|c| c.id) != Some(*d)) {
            changes.insert("device".into(), json!(device));
        }
        if let Some(site) = self.site.filter(|s| current.site.map(|c| c.id) != Some(*s)) {
            changes.insert("site".into(), json!(site));
        }
        if let Some(tags) = self.tags_for(current) {
            changes.insert("tags".into(), tags);
        }
        changes
    }

    /// Full tag list when the pool tags differ. Tags outside the pool
    /// namespace are kept.
    fn tags_for(&self, current: &VirtualMachine) -> Option<Value> {
        let (pools, others): (Vec<&str>, Vec<&str>) =
            current.tag_names().partition(|name| name.starts_with(POOL_TAG_PREFIX));
        let pools: BTreeSet<&str> = pools.into_iter().collect();
        let wanted: BTreeSet<&str> = self.pool_tag.as_deref().into_iter().collect();
        if pools == wanted {
            return None;
        }
        let tags: Vec<Value> = others
            .into_iter()
            .chain(wanted)
            .map(|name| json!({"name": name}))
            .collect();
        Some(Value::Array(tags))
    }
}
