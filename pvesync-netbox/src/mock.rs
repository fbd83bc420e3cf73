//! In-memory NetBox for tests and dry demos.
//!
//! Speaks the same request/response shapes as the real API: paged listings
//! with `limit`/`offset`/`next`, equality filters, nested references on read,
//! PATCH merge semantics and cascading deletes. It also enforces the NetBox
//! rules the sync has to respect: an address or MAC cannot be moved while it
//! is its parent's primary, a primary must belong to the parent itself, and
//! names are unique per parent. As in NetBox 4.2+, an interface's
//! `mac_address` is read-only and mirrors its primary MAC object.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::client::Endpoint;
use crate::error::Result;
use crate::models::{cidr_host, VM_INTERFACE_TYPE};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

const REFERENCE_FIELDS: &[&str] = &[
    "virtual_machine",
    "cluster",
    "role",
    "vrf",
    "untagged_vlan",
    "primary_ip4",
    "primary_ip6",
    "primary_mac_address",
    "site",
    "device",
];

const CHOICE_FIELDS: &[&str] = &["status", "mode"];

/// In-memory NetBox object store.
pub struct MockNetbox {
    state: Mutex<MockStore>,
}

#[derive(Default)]
struct MockStore {
    objects: HashMap<Endpoint, BTreeMap<u64, Value>>,
    next_id: u64,
    requests: Vec<ApiRequest>,
    fail_next: VecDeque<u16>,
    fail_rules: Vec<FailRule>,
}

struct FailRule {
    method: Method,
    path_contains: String,
    status: u16,
}

impl MockNetbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockStore::default()),
        }
    }

    fn store(&self) -> MutexGuard<'_, MockStore> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Seeding and inspection
    // =========================================================================

    /// Insert an object directly, bypassing validation. Returns its id.
    pub fn insert(&self, endpoint: Endpoint, object: Value) -> u64 {
        let mut store = self.store();
        store.next_id += 1;
        let id = store.next_id;
        let mut object = normalize(object);
        if let Value::Object(map) = &mut object {
            map.insert("id".to_string(), json!(id));
        }
        store.objects.entry(endpoint).or_default().insert(id, object);
        id
    }

    pub fn insert_vm(&self, name: &str, cluster: u64, status: &str) -> u64 {
        self.insert(
            Endpoint::VirtualMachines,
            json!({"name": name, "cluster": cluster, "status": status, "custom_fields": {}}),
        )
    }

    /// Insert a VM interface; a MAC becomes its primary MAC object.
    pub fn insert_interface(&self, vm: u64, name: &str, mac: Option<&str>) -> u64 {
        let interface = self.insert(
            Endpoint::VmInterfaces,
            json!({"virtual_machine": vm, "name": name, "primary_mac_address": null}),
        );
        if let Some(mac) = mac {
            let object = self.insert_mac(mac, Some(interface));
            let mut store = self.store();
            if let Some(iface) = store.objects.get_mut(&Endpoint::VmInterfaces).and_then(|m| m.get_mut(&interface)) {
                iface["primary_mac_address"] = json!({"id": object});
            }
            store.sync_interface_macs();
        }
        interface
    }

    /// Insert a MAC object, optionally assigned to a VM interface.
    pub fn insert_mac(&self, mac: &str, interface: Option<u64>) -> u64 {
        self.insert_mac_on(mac, interface.map(|id| (VM_INTERFACE_TYPE, id)))
    }

    /// Insert a MAC object assigned to any object type.
    pub fn insert_mac_on(&self, mac: &str, assigned: Option<(&str, u64)>) -> u64 {
        self.insert(
            Endpoint::MacAddresses,
            json!({
                "mac_address": mac,
                "assigned_object_type": assigned.map(|(t, _)| t),
                "assigned_object_id": assigned.map(|(_, id)| id),
            }),
        )
    }

    pub fn insert_ip(&self, address: &str, vrf: Option<u64>, interface: Option<u64>) -> u64 {
        self.insert_ip_on(address, vrf, interface.map(|id| (VM_INTERFACE_TYPE, id)))
    }

    /// Insert an address assigned to any object type.
    pub fn insert_ip_on(&self, address: &str, vrf: Option<u64>, assigned: Option<(&str, u64)>) -> u64 {
        self.insert(
            Endpoint::IpAddresses,
            json!({
                "address": address,
                "vrf": vrf,
                "status": "active",
                "dns_name": "",
                "assigned_object_type": assigned.map(|(t, _)| t),
                "assigned_object_id": assigned.map(|(_, id)| id),
            }),
        )
    }

    pub fn insert_device(&self, name: &str, site: Option<u64>) -> u64 {
        self.insert(Endpoint::Devices, json!({"name": name, "site": site}))
    }

    pub fn insert_tag(&self, name: &str, slug: &str) -> u64 {
        self.insert(Endpoint::Tags, json!({"name": name, "slug": slug, "description": ""}))
    }

    pub fn insert_prefix(&self, prefix: &str, vrf: Option<u64>) -> u64 {
        self.insert(Endpoint::Prefixes, json!({"prefix": prefix, "vrf": vrf}))
    }

    pub fn objects(&self, endpoint: Endpoint) -> Vec<Value> {
        self.store()
            .objects
            .get(&endpoint)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, endpoint: Endpoint, id: u64) -> Option<Value> {
        self.store().objects.get(&endpoint).and_then(|m| m.get(&id)).cloned()
    }

    /// First object of `endpoint` whose `field` equals `value`.
    pub fn find(&self, endpoint: Endpoint, field: &str, value: &str) -> Option<Value> {
        self.objects(endpoint)
            .into_iter()
            .find(|o| scalar_string(&o[field]).as_deref() == Some(value))
    }

    pub fn count(&self, endpoint: Endpoint) -> usize {
        self.store().objects.get(&endpoint).map(BTreeMap::len).unwrap_or(0)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.store().requests.clone()
    }

    /// Requests that would change server state.
    pub fn mutations(&self) -> Vec<ApiRequest> {
        self.store()
            .requests
            .iter()
            .filter(|r| r.method.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.store().requests.clear();
    }

    /// Answer the next `count` requests with `status`.
    pub fn fail_next(&self, status: u16, count: usize) {
        let mut store = self.store();
        for _ in 0..count {
            store.fail_next.push_back(status);
        }
    }

    /// Answer every `method` request whose path contains `path_contains` with `status`.
    pub fn fail_on(&self, method: Method, path_contains: &str, status: u16) {
        self.store().fail_rules.push(FailRule {
            method,
            path_contains: path_contains.to_string(),
            status,
        });
    }

    pub fn clear_failures(&self) {
        let mut store = self.store();
        store.fail_next.clear();
        store.fail_rules.clear();
    }
}

impl Default for MockNetbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockNetbox {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut store = self.store();
        store.requests.push(request.clone());
        debug!(operation = %request.operation(), "Mock NetBox request");

        if let Some(status) = store.fail_next.pop_front() {
            return Ok(error(status, "scripted failure"));
        }
        if let Some(rule) = store
            .fail_rules
            .iter()
            .find(|r| r.method == request.method && request.path.contains(&r.path_contains))
        {
            return Ok(error(rule.status, "scripted failure"));
        }

        let Some((endpoint, id)) = Endpoint::from_path(&request.path) else {
            return Ok(error(404, "Not found."));
        };

        Ok(match (request.method, id) {
            (Method::Get, None) => store.list(endpoint, request),
            (Method::Get, Some(id)) => match store.objects.get(&endpoint).and_then(|m| m.get(&id)) {
                Some(object) => ApiResponse::new(200, object.clone()),
                None => error(404, "Not found."),
            },
            (Method::Post, None) => store.create(endpoint, request.body.clone().unwrap_or(Value::Null)),
            (Method::Patch, Some(id)) => {
                store.update(endpoint, id, request.body.clone().unwrap_or(Value::Null))
            }
            (Method::Delete, Some(id)) => store.delete(endpoint, id),
            _ => error(405, "Method not allowed."),
        })
    }
}

impl MockStore {
    fn list(&self, endpoint: Endpoint, request: &ApiRequest) -> ApiResponse {
        let mut limit = 50usize;
        let mut offset = 0usize;
        let mut filters: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, value) in &request.query {
            match key.as_str() {
                "limit" => limit = value.parse().unwrap_or(50),
                "offset" => offset = value.parse().unwrap_or(0),
                _ => filters.entry(key.as_str()).or_default().push(value.as_str()),
            }
        }

        let matching: Vec<&Value> = self
            .objects
            .get(&endpoint)
            .map(|m| {
                m.values()
                    .filter(|o| {
                        filters
                            .iter()
                            .all(|(key, values)| values.iter().any(|v| matches_filter(o, key, v)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let count = matching.len();
        let results: Vec<Value> = matching.into_iter().skip(offset).take(limit).cloned().collect();
        let next = if offset + results.len() < count {
            json!(format!(
                "http://netbox.mock{}?limit={}&offset={}",
                endpoint.path(),
                limit,
                offset + limit
            ))
        } else {
            Value::Null
        };

        ApiResponse::new(
            200,
            json!({"count": count, "next": next, "previous": null, "results": results}),
        )
    }

    fn create(&mut self, endpoint: Endpoint, body: Value) -> ApiResponse {
        let Value::Object(_) = body else {
            return error(400, "Expected a JSON object.");
        };
        let mut object = normalize(body);
        if let Err(message) = self.resolve_tags(&mut object) {
            return error(400, &message);
        }
        if let Err(message) = self.validate(endpoint, None, &object) {
            return error(400, &message);
        }

        self.next_id += 1;
        let id = self.next_id;
        if let Value::Object(map) = &mut object {
            map.insert("id".to_string(), json!(id));
        }
        self.objects.entry(endpoint).or_default().insert(id, object);
        self.sync_interface_macs();
        let stored = self.objects.get(&endpoint).and_then(|m| m.get(&id)).cloned().unwrap_or(Value::Null);
        ApiResponse::new(201, stored)
    }

    fn update(&mut self, endpoint: Endpoint, id: u64, body: Value) -> ApiResponse {
        let Some(current) = self.objects.get(&endpoint).and_then(|m| m.get(&id)).cloned() else {
            return error(404, "Not found.");
        };
        let Value::Object(patch) = normalize(body) else {
            return error(400, "Expected a JSON object.");
        };

        let mut merged = current.clone();
        if let Value::Object(target) = &mut merged {
            for (key, value) in patch {
                if key == "custom_fields" {
                    if let (Some(Value::Object(existing)), Value::Object(fields)) =
                        (target.get_mut("custom_fields"), &value)
                    {
                        existing.extend(fields.clone());
                        continue;
                    }
                }
                target.insert(key, value);
            }
        }

        if let Err(message) = self.resolve_tags(&mut merged) {
            return error(400, &message);
        }
        if let Err(message) = self.validate(endpoint, Some((id, &current)), &merged) {
            return error(400, &message);
        }
        self.objects.entry(endpoint).or_default().insert(id, merged);
        self.sync_interface_macs();
        let stored = self.objects.get(&endpoint).and_then(|m| m.get(&id)).cloned().unwrap_or(Value::Null);
        ApiResponse::new(200, stored)
    }

    // Tags are written as ids or `{"name": ...}` lookups and read back nested.
    fn resolve_tags(&self, object: &mut Value) -> std::result::Result<(), String> {
        let Some(Value::Array(entries)) = object.get("tags").cloned() else {
            return Ok(());
        };
        let tags = self.objects.get(&Endpoint::Tags);
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            let found = tags.and_then(|tags| {
                tags.values().find(|tag| match &entry {
                    Value::Number(_) => ref_id(tag) == entry.as_u64(),
                    Value::Object(attrs) => attrs.iter().all(|(key, value)| &tag[key.as_str()] == value),
                    _ => false,
                })
            });
            match found {
                Some(tag) => resolved.push(json!({"id": tag["id"], "name": tag["name"], "slug": tag["slug"]})),
                None => return Err(format!("tags: Related object not found using the provided attributes: {}", entry)),
            }
        }
        object["tags"] = Value::Array(resolved);
        Ok(())
    }

    // Interface `mac_address` mirrors the primary MAC object.
    fn sync_interface_macs(&mut self) {
        let macs: HashMap<u64, Value> = self
            .objects
            .get(&Endpoint::MacAddresses)
            .map(|m| m.iter().map(|(id, o)| (*id, o["mac_address"].clone())).collect())
            .unwrap_or_default();
        if let Some(interfaces) = self.objects.get_mut(&Endpoint::VmInterfaces) {
            for iface in interfaces.values_mut() {
                let mac = ref_id(&iface["primary_mac_address"])
                    .and_then(|id| macs.get(&id).cloned())
                    .unwrap_or(Value::Null);
                iface["mac_address"] = mac;
            }
        }
    }

    fn delete(&mut self, endpoint: Endpoint, id: u64) -> ApiResponse {
        let removed = self.objects.get_mut(&endpoint).and_then(|m| m.remove(&id));
        if removed.is_none() {
            return error(404, "Not found.");
        }

        match endpoint {
            Endpoint::VirtualMachines => {
                let interfaces = self.remove_children(Endpoint::VmInterfaces, id);
                self.remove_children(Endpoint::VirtualDisks, id);
                for interface in interfaces {
                    self.detach_interface(interface);
                }
            }
            Endpoint::VmInterfaces => self.detach_interface(id),
            Endpoint::MacAddresses => {
                if let Some(interfaces) = self.objects.get_mut(&Endpoint::VmInterfaces) {
                    for iface in interfaces.values_mut() {
                        if ref_id(&iface["primary_mac_address"]) == Some(id) {
                            iface["primary_mac_address"] = Value::Null;
                        }
                    }
                }
                self.sync_interface_macs();
            }
            Endpoint::IpAddresses => {
                if let Some(vms) = self.objects.get_mut(&Endpoint::VirtualMachines) {
                    for vm in vms.values_mut() {
                        for field in ["primary_ip4", "primary_ip6"] {
                            if ref_id(&vm[field]) == Some(id) {
                                vm[field] = Value::Null;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        ApiResponse::new(204, Value::Null)
    }

    fn remove_children(&mut self, endpoint: Endpoint, vm: u64) -> Vec<u64> {
        let Some(objects) = self.objects.get_mut(&endpoint) else {
            return Vec::new();
        };
        let ids: Vec<u64> = objects
            .iter()
            .filter(|(_, o)| ref_id(&o["virtual_machine"]) == Some(vm))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            objects.remove(id);
        }
        ids
    }

    // Addresses are unassigned, MAC objects go with their interface.
    fn detach_interface(&mut self, interface: u64) {
        if let Some(addresses) = self.objects.get_mut(&Endpoint::IpAddresses) {
            for address in addresses.values_mut() {
                if is_on_vm_interface(address, interface) {
                    address["assigned_object_type"] = Value::Null;
                    address["assigned_object_id"] = Value::Null;
                }
            }
        }
        if let Some(macs) = self.objects.get_mut(&Endpoint::MacAddresses) {
            macs.retain(|_, mac| !is_on_vm_interface(mac, interface));
        }
    }

    fn interface_owner(&self, interface: u64) -> Option<u64> {
        self.objects
            .get(&Endpoint::VmInterfaces)
            .and_then(|m| m.get(&interface))
            .and_then(|i| ref_id(&i["virtual_machine"]))
    }

    fn exists(&self, endpoint: Endpoint, id: u64) -> bool {
        self.objects.get(&endpoint).is_some_and(|m| m.contains_key(&id))
    }

    fn name_taken(&self, endpoint: Endpoint, own_id: Option<u64>, object: &Value, scope: &str) -> bool {
        self.objects.get(&endpoint).is_some_and(|m| {
            m.iter().any(|(id, other)| {
                Some(*id) != own_id && other["name"] == object["name"] && other[scope] == object[scope]
            })
        })
    }

    fn validate(&self, endpoint: Endpoint, existing: Option<(u64, &Value)>, object: &Value) -> std::result::Result<(), String> {
        let own_id = existing.map(|(id, _)| id);
        match endpoint {
            Endpoint::VirtualMachines => {
                if !object["name"].is_string() {
                    return Err("name: This field is required.".to_string());
                }
                if self.name_taken(endpoint, own_id, object, "cluster") {
                    return Err("Virtual machine name must be unique per cluster.".to_string());
                }
                for field in ["primary_ip4", "primary_ip6"] {
                    let Some(ip) = ref_id(&object[field]) else { continue };
                    let owner = self
                        .objects
                        .get(&Endpoint::IpAddresses)
                        .and_then(|m| m.get(&ip))
                        .and_then(vm_interface_of)
                        .and_then(|i| self.interface_owner(i));
                    if owner.is_none() || owner != own_id {
                        return Err(format!(
                            "{}: The specified IP address is not assigned to this VM.",
                            field
                        ));
                    }
                }
            }
            Endpoint::VmInterfaces | Endpoint::VirtualDisks => {
                if let Some(mac) = ref_id(&object["primary_mac_address"]) {
                    let assigned = self
                        .objects
                        .get(&Endpoint::MacAddresses)
                        .and_then(|m| m.get(&mac))
                        .is_some_and(|m| own_id.is_some_and(|own| is_on_vm_interface(m, own)));
                    if !assigned {
                        return Err("primary_mac_address: The MAC address is not assigned to this interface.".to_string());
                    }
                }
                let Some(vm) = ref_id(&object["virtual_machine"]) else {
                    return Err("virtual_machine: This field is required.".to_string());
                };
                if !self.exists(Endpoint::VirtualMachines, vm) {
                    return Err("virtual_machine: Related object not found.".to_string());
                }
                if !object["name"].is_string() {
                    return Err("name: This field is required.".to_string());
                }
                if self.name_taken(endpoint, own_id, object, "virtual_machine") {
                    return Err("Name must be unique per virtual machine.".to_string());
                }
            }
            Endpoint::MacAddresses => {
                if !object["mac_address"].is_string() {
                    return Err("mac_address: This field is required.".to_string());
                }
                if let Some(interface) = vm_interface_of(object) {
                    if !self.exists(Endpoint::VmInterfaces, interface) {
                        return Err("assigned_object_id: Related object not found.".to_string());
                    }
                }
                if let Some((id, current)) = existing {
                    let moved = current["assigned_object_id"] != object["assigned_object_id"]
                        || current["assigned_object_type"] != object["assigned_object_type"];
                    let primary_of_previous = vm_interface_of(current).is_some_and(|i| {
                        self.objects
                            .get(&Endpoint::VmInterfaces)
                            .and_then(|m| m.get(&i))
                            .is_some_and(|iface| ref_id(&iface["primary_mac_address"]) == Some(id))
                    });
                    if moved && primary_of_previous {
                        return Err("Cannot unassign MAC Address while it is designated as the primary MAC for an object".to_string());
                    }
                }
            }
            Endpoint::IpAddresses => {
                if !object["address"].as_str().is_some_and(|a| cidr_host(a).is_some()) {
                    return Err("address: Enter a valid IPv4 or IPv6 address with mask.".to_string());
                }
                if let Some(interface) = vm_interface_of(object) {
                    if !self.exists(Endpoint::VmInterfaces, interface) {
                        return Err("assigned_object_id: Related object not found.".to_string());
                    }
                }
                if let Some((id, current)) = existing {
                    let moved = current["assigned_object_id"] != object["assigned_object_id"];
                    let previous_owner = vm_interface_of(current).and_then(|i| self.interface_owner(i));
                    if moved && previous_owner.is_some_and(|vm| self.is_primary_of(vm, id)) {
                        return Err("Cannot reassign IP address while it is designated as the primary IP for the parent object".to_string());
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn is_primary_of(&self, vm: u64, ip: u64) -> bool {
        self.objects
            .get(&Endpoint::VirtualMachines)
            .and_then(|m| m.get(&vm))
            .is_some_and(|v| ref_id(&v["primary_ip4"]) == Some(ip) || ref_id(&v["primary_ip6"]) == Some(ip))
    }
}

fn vm_interface_of(object: &Value) -> Option<u64> {
    (object["assigned_object_type"] == VM_INTERFACE_TYPE)
        .then(|| object["assigned_object_id"].as_u64())
        .flatten()
}

fn is_on_vm_interface(object: &Value, interface: u64) -> bool {
    vm_interface_of(object) == Some(interface)
}

fn error(status: u16, detail: &str) -> ApiResponse {
    ApiResponse::new(status, json!({"detail": detail}))
}

fn ref_id(value: &Value) -> Option<u64> {
    value.get("id").and_then(Value::as_u64).or_else(|| value.as_u64())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("value").and_then(scalar_string),
        _ => None,
    }
}

// Rewrite write-shaped payloads (`"cluster": 1`) into read shape (`{"id": 1}`).
fn normalize(object: Value) -> Value {
    let Value::Object(mut map) = object else {
        return object;
    };
    for field in REFERENCE_FIELDS {
        if let Some(id) = map.get(*field).and_then(Value::as_u64) {
            map.insert(field.to_string(), json!({"id": id}));
        }
    }
    for field in CHOICE_FIELDS {
        if let Some(value) = map.get(*field).and_then(Value::as_str).map(str::to_string) {
            map.insert(field.to_string(), json!({"value": value, "label": value}));
        }
    }
    Value::Object(map)
}

fn matches_filter(object: &Value, key: &str, expected: &str) -> bool {
    let wants_null = expected == "null";

    if let Some(value) = object.get(key).filter(|v| !v.is_object()) {
        return match key {
            "address" => value.as_str().and_then(cidr_host) == cidr_host(expected),
            "mac_address" => value
                .as_str()
                .is_some_and(|mac| mac.eq_ignore_ascii_case(expected)),
            _ if wants_null => value.is_null(),
            _ => scalar_string(value).as_deref() == Some(expected),
        };
    }

    if let Some(field) = key.strip_suffix("__ie") {
        return object[field]
            .as_str()
            .is_some_and(|value| value.eq_ignore_ascii_case(expected));
    }

    if let Some(field) = key.strip_suffix("_id") {
        let id = ref_id(&object[field]);
        return if wants_null {
            id.is_none()
        } else {
            id.map(|i| i.to_string()).as_deref() == Some(expected)
        };
    }

    match object.get(key) {
        Some(value) => scalar_string(value).as_deref() == Some(expected),
        None => wants_null,
    }
}
