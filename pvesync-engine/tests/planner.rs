//! Planner behaviour against inventories loaded from the in-memory NetBox.

mod common;

use serde_json::{json, Value};
use std::collections::HashSet;

use common::{disk, entity, interface, Harness, CLUSTER};
use pvesync_engine::{
    plan, shutdown_channel, Action, Applier, IdentifierKind, ObjectType, Operation, OwnerStatus, Planner, PowerState,
    Ref, RoleIds,
};
use pvesync_netbox::Endpoint;

fn is_create(op: &Operation) -> bool {
    op.is_create()
}

fn targets(op: &Operation, object: ObjectType, id: u64) -> bool {
    op.object == object && op.action == Action::Update { target: Ref::Existing(id) }
}

async fn apply(harness: &Harness, plan: &pvesync_engine::Plan) {
    let (_trigger, shutdown) = shutdown_channel();
    let outcome = Applier::new(harness.client.clone(), false)
        .apply(plan, &shutdown)
        .await
        .unwrap();
    assert_eq!(outcome.failed, 0, "{:?}", outcome);
    assert_eq!(outcome.skipped, 0, "{:?}", outcome);
}

#[tokio::test]
async fn test_new_entity_is_created_once_per_object() {
    let harness = Harness::new();
    let mut web = entity(
        100,
        "web01",
        PowerState::Running,
        vec![
            interface("net0", "ens18", Some("AA:BB:CC:00:00:01"), &["10.0.0.5/24", "2001:db8::5/64"]),
            interface("net1", "net1", Some("AA:BB:CC:00:00:02"), &[]),
        ],
    );
    web.disks = vec![disk("scsi0", 32), disk("scsi1", 100)];

    let plan = plan(&[web], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.count(ObjectType::VirtualMachine, is_create), 1);
    assert_eq!(plan.count(ObjectType::Disk, is_create), 2);
    assert_eq!(plan.count(ObjectType::Interface, is_create), 2);
    assert_eq!(plan.count(ObjectType::IpAddress, is_create), 2);
    assert_eq!(plan.count(ObjectType::MacAddress, is_create), 2);
    assert_eq!(plan.count(ObjectType::Vlan, is_create), 0);
    assert!(plan.conflicts.is_empty());
    // parent first
    assert_eq!(plan.operations[0].object, ObjectType::VirtualMachine);
    // primary IPs are set once the addresses exist
    let last = plan.operations.last().unwrap();
    assert!(last.sets("primary_ip4") && last.sets("primary_ip6"));

    apply(&harness, &plan).await;

    let vm = harness.netbox.find(Endpoint::VirtualMachines, "name", "web01").unwrap();
    let v4 = harness.netbox.find(Endpoint::IpAddresses, "address", "10.0.0.5/24").unwrap();
    assert_eq!(vm["primary_ip4"]["id"], v4["id"]);
    assert_eq!(vm["serial"], "100");
    assert_eq!(vm["cluster"]["id"], CLUSTER);
    let scsi1 = harness.netbox.find(Endpoint::VirtualDisks, "name", "scsi1").unwrap();
    assert_eq!(scsi1["size"], 100 * 1024);
    assert_eq!(scsi1["description"], "SCSI local-lvm:scsi1");
    let ens18 = harness.netbox.find(Endpoint::VmInterfaces, "name", "ens18").unwrap();
    let mac = harness.netbox.find(Endpoint::MacAddresses, "mac_address", "AA:BB:CC:00:00:01").unwrap();
    assert_eq!(mac["assigned_object_type"], "virtualization.vminterface");
    assert_eq!(mac["assigned_object_id"], ens18["id"]);
    assert_eq!(ens18["primary_mac_address"]["id"], mac["id"]);
    assert_eq!(ens18["mac_address"], "AA:BB:CC:00:00:01");
}

#[tokio::test]
async fn test_converged_target_plans_nothing() {
    let harness = Harness::new();
    let mut web = entity(
        100,
        "web01",
        PowerState::Running,
        vec![interface("net0", "ens18", Some("AA:BB:CC:00:00:01"), &["10.0.0.5/24", "2001:db8::5/64"])],
    );
    web.disks = vec![disk("scsi0", 32)];
    web.interfaces[0].vlan = Some(30);
    web.interfaces[0].mtu = Some(9000);
    web.ha = true;
    let entities = vec![web];
    let roles = RoleIds { vm: Some(3), lxc: None };

    let first = plan(&entities, &harness.inventory().await, roles);
    apply(&harness, &first).await;

    let second = plan(&entities, &harness.inventory().await, roles);
    assert!(second.is_empty(), "{:#?}", second.operations);
}

#[tokio::test]
async fn test_changes_become_targeted_updates() {
    let harness = Harness::new();
    let mut web = entity(
        100,
        "web01",
        PowerState::Running,
        vec![interface("net0", "net0", Some("AA:BB:CC:00:00:01"), &["10.0.0.5/24"])],
    );
    web.disks = vec![disk("scsi0", 32)];
    apply(&harness, &plan(&[web.clone()], &harness.inventory().await, RoleIds::default())).await;

    // Guest agent comes up (rename), VM stopped, disk grown, mask changed.
    web.power = PowerState::Stopped;
    web.interfaces[0].name = "ens18".to_string();
    web.interfaces[0].addresses = vec!["10.0.0.5/16".to_string()];
    web.disks[0].size_bytes *= 2;
    let plan = plan(&[web], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.count(ObjectType::VirtualMachine, Operation::is_update), 1);
    assert_eq!(plan.count(ObjectType::Disk, Operation::is_update), 1);
    assert_eq!(plan.count(ObjectType::Interface, Operation::is_update), 1);
    assert_eq!(plan.count(ObjectType::IpAddress, Operation::is_update), 1);
    assert!(plan.operations.iter().all(|op| !op.is_create() && !op.is_delete()));
    let vm_update = &plan.operations[0];
    assert_eq!(vm_update.body.get("status"), Some(&json!("offline")));
    assert_eq!(vm_update.body.len(), 1);

    apply(&harness, &plan).await;
    let iface = harness.netbox.find(Endpoint::VmInterfaces, "name", "ens18").unwrap();
    assert_eq!(iface["mac_address"], "AA:BB:CC:00:00:01");
    assert!(harness.netbox.find(Endpoint::IpAddresses, "address", "10.0.0.5/16").is_some());
}

/// Old VM offline, holding MAC and primary IP the new guest reports.
async fn seed_previous_owner(harness: &Harness, status: &str) -> (u64, u64, u64) {
    let old = harness.netbox.insert_vm("old01", CLUSTER, status);
    let old_if = harness.netbox.insert_interface(old, "eth0", Some("AA:BB:CC:00:00:01"));
    let ip = harness.netbox.insert_ip("10.0.0.5/24", None, Some(old_if));
    harness
        .client
        .update(Endpoint::VirtualMachines, old, json!({"primary_ip4": ip}), "old01")
        .await
        .unwrap();
    harness.netbox.clear_requests();
    (old, old_if, ip)
}

fn claimant() -> pvesync_engine::SourceEntity {
    entity(
        200,
        "new01",
        PowerState::Running,
        vec![interface("net0", "eth0", Some("AA:BB:CC:00:00:01"), &["10.0.0.5/24"])],
    )
}

#[tokio::test]
async fn test_offline_owner_loses_mac_and_address() {
    let harness = Harness::new();
    let (old, old_if, ip) = seed_previous_owner(&harness, "offline").await;

    let plan = plan(&[claimant()], &harness.inventory().await, RoleIds::default());

    assert!(plan.conflicts.is_empty());
    let cleared_mac = plan
        .operations
        .iter()
        .position(|op| targets(op, ObjectType::Interface, old_if))
        .unwrap();
    assert_eq!(plan.operations[cleared_mac].body.get("primary_mac_address"), Some(&Value::Null));
    let moved_mac = plan
        .operations
        .iter()
        .position(|op| op.object == ObjectType::MacAddress && op.is_update())
        .unwrap();
    assert!(cleared_mac < moved_mac);
    assert_eq!(plan.count(ObjectType::MacAddress, is_create), 0);
    let cleared_primary = plan
        .operations
        .iter()
        .position(|op| targets(op, ObjectType::VirtualMachine, old))
        .unwrap();
    assert_eq!(plan.operations[cleared_primary].body.get("primary_ip4"), Some(&Value::Null));
    let moved = plan
        .operations
        .iter()
        .position(|op| targets(op, ObjectType::IpAddress, ip))
        .unwrap();
    assert!(cleared_primary < moved);

    apply(&harness, &plan).await;

    let old_vm = harness.netbox.object(Endpoint::VirtualMachines, old).unwrap();
    assert!(old_vm["primary_ip4"].is_null());
    assert!(harness.netbox.object(Endpoint::VmInterfaces, old_if).unwrap()["mac_address"].is_null());
    let new_vm = harness.netbox.find(Endpoint::VirtualMachines, "name", "new01").unwrap();
    assert_eq!(new_vm["primary_ip4"]["id"], ip);
    let new_if = harness
        .netbox
        .find(Endpoint::VmInterfaces, "mac_address", "AA:BB:CC:00:00:01")
        .unwrap();
    assert_eq!(new_if["virtual_machine"]["id"], new_vm["id"]);
    assert_eq!(
        harness.netbox.object(Endpoint::IpAddresses, ip).unwrap()["assigned_object_id"],
        new_if["id"]
    );
    assert_eq!(harness.netbox.count(Endpoint::MacAddresses), 1);

    let again = pvesync_engine::plan(&[claimant()], &harness.inventory().await, RoleIds::default());
    assert!(again.is_empty(), "{:#?}", again.operations);
}

#[tokio::test]
async fn test_active_owner_keeps_mac_and_address() {
    let harness = Harness::new();
    let (old, old_if, ip) = seed_previous_owner(&harness, "active").await;

    let plan = plan(&[claimant()], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.conflicts.len(), 2);
    let mac = plan.conflicts.iter().find(|c| c.kind == IdentifierKind::MacAddress).unwrap();
    assert_eq!(mac.owner_name, "old01");
    assert_eq!(mac.owner_id, Some(old));
    assert_eq!(mac.owner_status, OwnerStatus::Active);
    assert_eq!(mac.owner_interface, "eth0");
    assert!(plan.conflicts.iter().any(|c| c.kind == IdentifierKind::IpAddress));
    assert!(!plan.operations.iter().any(|op| targets(op, ObjectType::Interface, old_if)
        || targets(op, ObjectType::VirtualMachine, old)
        || targets(op, ObjectType::IpAddress, ip)));
    // the rest of the entity still goes ahead
    assert_eq!(plan.count(ObjectType::VirtualMachine, is_create), 1);
    assert_eq!(plan.count(ObjectType::Interface, is_create), 1);
    assert_eq!(plan.count(ObjectType::MacAddress, |_| true), 0);
    assert!(!plan.operations.iter().any(|op| op.sets("primary_mac_address")));
    assert!(!plan.operations.iter().any(|op| op.sets("primary_ip4")));

    apply(&harness, &plan).await;
    assert_eq!(
        harness.netbox.object(Endpoint::VirtualMachines, old).unwrap()["primary_ip4"]["id"],
        ip
    );
}

#[tokio::test]
async fn test_owner_outside_cluster_is_a_conflict() {
    let harness = Harness::new();
    let foreign = harness.netbox.insert_vm("old01", 9, "offline");
    let foreign_if = harness.netbox.insert_interface(foreign, "eth0", Some("AA:BB:CC:00:00:01"));
    let ip = harness.netbox.insert_ip("10.0.0.5/24", None, Some(foreign_if));

    let plan = plan(&[claimant()], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.conflicts.len(), 2);
    assert!(plan.conflicts.iter().all(|c| c.owner_status == OwnerStatus::Unknown && !c.owner_stale));
    assert!(!plan.operations.iter().any(|op| targets(op, ObjectType::IpAddress, ip)));
    assert_eq!(plan.count(ObjectType::MacAddress, |_| true), 0);
}

#[tokio::test]
async fn test_address_held_by_device_interface_is_a_conflict() {
    let harness = Harness::new();
    let ip = harness
        .netbox
        .insert_ip_on("10.0.0.5/24", None, Some(("dcim.interface", 77)));

    let plan = plan(&[claimant()], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.conflicts.len(), 1);
    let conflict = &plan.conflicts[0];
    assert_eq!(conflict.kind, IdentifierKind::IpAddress);
    assert_eq!(conflict.owner_status, OwnerStatus::Unknown);
    assert_eq!(conflict.owner_name, "dcim.interface 77");
    assert_eq!(conflict.owner_id, None);
    assert!(!plan.operations.iter().any(|op| targets(op, ObjectType::IpAddress, ip)));
    assert_eq!(plan.count(ObjectType::IpAddress, |_| true), 0);
    assert!(!plan.operations.iter().any(|op| op.sets("primary_ip4")));

    apply(&harness, &plan).await;
    let address = harness.netbox.object(Endpoint::IpAddresses, ip).unwrap();
    assert_eq!(address["assigned_object_type"], "dcim.interface");
    assert_eq!(address["assigned_object_id"], 77);
}

#[tokio::test]
async fn test_mac_held_by_device_interface_is_a_conflict() {
    let harness = Harness::new();
    let mac = harness
        .netbox
        .insert_mac_on("AA:BB:CC:00:00:01", Some(("dcim.interface", 77)));

    let plan = plan(&[claimant()], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].kind, IdentifierKind::MacAddress);
    assert_eq!(plan.conflicts[0].owner_status, OwnerStatus::Unknown);
    assert!(!plan.operations.iter().any(|op| targets(op, ObjectType::MacAddress, mac)));
    assert!(!plan.operations.iter().any(|op| op.sets("primary_mac_address")));
    // the address is free and still assigned
    assert_eq!(plan.count(ObjectType::IpAddress, is_create), 1);
}

#[tokio::test]
async fn test_conflicting_owner_missing_from_proxmox_is_flagged() {
    let harness = Harness::new();
    seed_previous_owner(&harness, "active").await;
    let inventory = harness.inventory().await;

    let renamed: HashSet<String> = ["new01".to_string()].into();
    let mut planner = Planner::new(&inventory, RoleIds::default()).with_listing(&renamed);
    planner.plan_entity(&claimant());
    let stale = planner.finish();

    assert_eq!(stale.conflicts.len(), 2);
    assert!(stale.conflicts.iter().all(|c| c.owner_stale));
    assert!(stale.conflicts[0].to_string().contains("no longer listed"));

    let both: HashSet<String> = ["new01".to_string(), "old01".to_string()].into();
    let mut planner = Planner::new(&inventory, RoleIds::default()).with_listing(&both);
    planner.plan_entity(&claimant());
    assert!(planner.finish().conflicts.iter().all(|c| !c.owner_stale));
}

#[tokio::test]
async fn test_same_pass_contention_goes_to_the_first_guest() {
    let harness = Harness::new();
    let first = claimant();
    let mut second = claimant();
    second.vmid = 201;
    second.name = "new02".to_string();

    let plan = plan(&[first, second], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.conflicts.len(), 2);
    assert!(plan.conflicts.iter().all(|c| c.entity.name == "new02"));
    assert_eq!(plan.count(ObjectType::IpAddress, is_create), 1);
}

#[tokio::test]
async fn test_same_address_in_another_vrf_is_not_a_conflict() {
    let harness = Harness::new();
    let other = harness.netbox.insert_vm("other01", CLUSTER, "active");
    let other_if = harness.netbox.insert_interface(other, "eth0", None);
    harness.netbox.insert_ip("10.0.0.5/24", None, Some(other_if));
    harness.netbox.insert_prefix("10.0.0.0/16", None);
    harness.netbox.insert_prefix("10.0.0.0/24", Some(7));
    let web = entity(
        100,
        "web01",
        PowerState::Running,
        vec![interface("net0", "eth0", Some("AA:BB:CC:00:00:09"), &["10.0.0.5/24"])],
    );

    let plan = plan(&[web], &harness.inventory().await, RoleIds::default());

    assert!(plan.conflicts.is_empty());
    let created = plan
        .operations
        .iter()
        .find(|op| op.object == ObjectType::IpAddress && op.is_create())
        .unwrap();
    assert_eq!(created.body.get("vrf"), Some(&json!(7)));

    apply(&harness, &plan).await;
    let same: Vec<Value> = harness
        .netbox
        .objects(Endpoint::IpAddresses)
        .into_iter()
        .filter(|ip| ip["address"] == "10.0.0.5/24")
        .collect();
    assert_eq!(same.len(), 2);
}

#[tokio::test]
async fn test_vlan_created_once_per_pass() {
    let harness = Harness::new();
    let mut a = entity(100, "a01", PowerState::Running, vec![interface("net0", "net0", None, &[])]);
    let mut b = entity(101, "b01", PowerState::Running, vec![interface("net0", "net0", None, &[])]);
    a.interfaces[0].vlan = Some(20);
    b.interfaces[0].vlan = Some(20);

    let plan = plan(&[a, b], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.count(ObjectType::Vlan, is_create), 1);
    apply(&harness, &plan).await;
    let vlan = harness.netbox.find(Endpoint::Vlans, "vid", "20").unwrap();
    assert_eq!(vlan["name"], "VLAN 20");
    for iface in harness.netbox.objects(Endpoint::VmInterfaces) {
        assert_eq!(iface["untagged_vlan"]["id"], vlan["id"]);
        assert_eq!(iface["mode"]["value"], "access");
    }
}

#[tokio::test]
async fn test_interface_matched_by_mac_across_renames() {
    let harness = Harness::new();
    let vm = harness.netbox.insert_vm("web01", CLUSTER, "active");
    let iface = harness.netbox.insert_interface(vm, "net0", Some("aa:bb:cc:00:00:01"));
    let web = entity(
        100,
        "web01",
        PowerState::Running,
        vec![interface("net0", "ens18", Some("AA:BB:CC:00:00:01"), &[])],
    );

    let plan = plan(&[web], &harness.inventory().await, RoleIds::default());

    let rename = plan
        .operations
        .iter()
        .find(|op| targets(op, ObjectType::Interface, iface))
        .unwrap();
    assert_eq!(rename.body.get("name"), Some(&json!("ens18")));
    assert!(!rename.sets("primary_mac_address"));
    assert_eq!(plan.count(ObjectType::MacAddress, |_| true), 0);
    assert_eq!(plan.count(ObjectType::Interface, is_create), 0);
}

#[tokio::test]
async fn test_disks_are_never_deleted() {
    let harness = Harness::new();
    let vm = harness.netbox.insert_vm("web01", CLUSTER, "active");
    harness.netbox.insert(
        Endpoint::VirtualDisks,
        json!({"virtual_machine": vm, "name": "scsi9", "size": 1024, "description": "", "custom_fields": {}}),
    );
    let web = entity(100, "web01", PowerState::Running, Vec::new());

    let plan = plan(&[web], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.count(ObjectType::Disk, |_| true), 0);
    assert!(!plan.operations.iter().any(Operation::is_delete));
}

#[tokio::test]
async fn test_pool_tags_and_node_device() {
    let harness = Harness::new();
    let device = harness.netbox.insert_device("PVE1", Some(4));
    let mut web = claimant();
    web.pool = Some("Prod".to_string());
    let pools = vec!["Prod".to_string(), "lab".to_string()];

    let inventory = harness.inventory().await;
    let mut planner = Planner::new(&inventory, RoleIds::default());
    planner.plan_pools(&pools);
    planner.plan_entity(&web);
    let plan = planner.finish();

    assert_eq!(plan.count(ObjectType::Tag, is_create), 2);
    let create_vm = plan
        .operations
        .iter()
        .find(|op| op.object == ObjectType::VirtualMachine && op.is_create())
        .unwrap();
    assert_eq!(create_vm.body.get("tags"), Some(&json!([{"name": "Pool/Prod"}])));
    assert_eq!(create_vm.body.get("device"), Some(&json!(device)));
    assert_eq!(create_vm.body.get("site"), Some(&json!(4)));

    apply(&harness, &plan).await;
    let tag = harness.netbox.find(Endpoint::Tags, "name", "Pool/lab").unwrap();
    assert_eq!(tag["slug"], "pool-lab");
    assert_eq!(tag["description"], "Proxmox pool lab");

    let inventory = harness.inventory().await;
    let mut planner = Planner::new(&inventory, RoleIds::default());
    planner.plan_pools(&pools);
    planner.plan_entity(&web);
    let again = planner.finish();
    assert!(again.is_empty(), "{:#?}", again.operations);
}

#[tokio::test]
async fn test_pool_change_keeps_other_tags() {
    let harness = Harness::new();
    let keep = harness.netbox.insert_tag("backup", "backup");
    let old_pool = harness.netbox.insert_tag("Pool/old", "pool-old");
    let vm = harness.netbox.insert_vm("new01", CLUSTER, "active");
    harness
        .client
        .update(Endpoint::VirtualMachines, vm, json!({"tags": [keep, old_pool]}), "new01")
        .await
        .unwrap();
    let mut web = claimant();
    web.pool = Some("new".to_string());

    let plan = plan(&[web.clone()], &harness.inventory().await, RoleIds::default());

    let update = plan
        .operations
        .iter()
        .find(|op| targets(op, ObjectType::VirtualMachine, vm) && op.sets("tags"))
        .unwrap();
    assert_eq!(update.body.get("tags"), Some(&json!([{"name": "backup"}, {"name": "Pool/new"}])));

    apply(&harness, &plan).await;
    web.pool = None;
    let cleared = pvesync_engine::plan(&[web], &harness.inventory().await, RoleIds::default());
    let update = cleared
        .operations
        .iter()
        .find(|op| targets(op, ObjectType::VirtualMachine, vm) && op.sets("tags"))
        .unwrap();
    assert_eq!(update.body.get("tags"), Some(&json!([{"name": "backup"}])));
}

#[tokio::test]
async fn test_dns_name_follows_prefix_zone() {
    let harness = Harness::new();
    harness.netbox.insert(
        Endpoint::Prefixes,
        json!({"prefix": "10.0.0.0/24", "vrf": null, "custom_fields": {"dns_name": " lab.example.com "}}),
    );
    harness.netbox.insert_prefix("10.0.0.0/16", None);
    let mut web = claimant();
    web.interfaces[0].addresses.push("10.0.1.5/16".to_string());

    let plan = plan(&[web.clone()], &harness.inventory().await, RoleIds::default());

    let created: Vec<&Operation> = plan
        .operations
        .iter()
        .filter(|op| op.object == ObjectType::IpAddress && op.is_create())
        .collect();
    assert_eq!(created[0].body.get("dns_name"), Some(&json!("new01.lab.example.com")));
    assert!(!created[1].sets("dns_name"));

    apply(&harness, &plan).await;
    let again = pvesync_engine::plan(&[web], &harness.inventory().await, RoleIds::default());
    assert!(again.is_empty(), "{:#?}", again.operations);
}

#[tokio::test]
async fn test_changed_mac_frees_the_old_object() {
    let harness = Harness::new();
    let vm = harness.netbox.insert_vm("web01", CLUSTER, "active");
    let iface = harness.netbox.insert_interface(vm, "eth0", Some("AA:BB:CC:00:00:01"));
    let old_mac = harness.netbox.find(Endpoint::MacAddresses, "mac_address", "AA:BB:CC:00:00:01").unwrap();
    let web = entity(
        100,
        "web01",
        PowerState::Running,
        vec![interface("net0", "eth0", Some("AA:BB:CC:00:00:09"), &[])],
    );

    let plan = plan(&[web.clone()], &harness.inventory().await, RoleIds::default());

    assert_eq!(plan.count(ObjectType::Interface, is_create), 0);
    assert_eq!(plan.count(ObjectType::MacAddress, is_create), 1);
    let freed = plan
        .operations
        .iter()
        .find(|op| op.object == ObjectType::MacAddress && op.is_update())
        .unwrap();
    assert_eq!(freed.action, Action::Update { target: Ref::Existing(old_mac["id"].as_u64().unwrap()) });
    assert_eq!(freed.body.get("assigned_object_id"), Some(&Value::Null));

    apply(&harness, &plan).await;
    let current = harness.netbox.object(Endpoint::VmInterfaces, iface).unwrap();
    assert_eq!(current["mac_address"], "AA:BB:CC:00:00:09");
    let old_mac = harness.netbox.find(Endpoint::MacAddresses, "mac_address", "AA:BB:CC:00:00:01").unwrap();
    assert!(old_mac["assigned_object_id"].is_null());

    let again = pvesync_engine::plan(&[web], &harness.inventory().await, RoleIds::default());
    assert!(again.is_empty(), "{:#?}", again.operations);
}
