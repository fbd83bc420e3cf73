//! Removal of target VMs whose guest no longer exists.

use serde_json::Map;
use std::collections::HashSet;
use tracing::info;

use crate::inventory::TargetInventory;
use crate::plan::{Action, ObjectType, Operation};

/// Delete operations for in-scope VMs whose name is not in `listed`.
///
/// `listed` must cover every guest the source listed, including kinds that
/// are not synced, so disabling a kind never deletes its VMs.
pub fn plan_cleanup(inventory: &TargetInventory, listed: &HashSet<String>) -> Vec<Operation> {
    inventory
        .scoped_vms()
        .into_iter()
        .filter(|vm| !listed.contains(&vm.name))
        .map(|vm| {
            info!(vm = %vm.name, id = vm.id, "VM no longer in Proxmox, scheduling removal");
            Operation {
                action: Action::Delete { id: vm.id },
                object: ObjectType::VirtualMachine,
                entity: vm.name.clone(),
                body: Map::new(),
                refs: Vec::new(),
            }
        })
        .collect()
}
