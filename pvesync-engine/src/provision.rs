//! Startup provisioning of custom fields and device roles.
//!
//! Every later mutation assumes these exist, so failures here are fatal.

use serde_json::json;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use pvesync_netbox::models::{slugify, CustomField, DeviceRole};
use pvesync_netbox::{Endpoint, NetboxClient, NetboxError};
use pvesync_proxmox::GuestKind;

use crate::error::{EngineError, Result};

/// Custom fields the sync reads or writes: `(name, label, type, object type)`.
pub const CUSTOM_FIELDS: &[(&str, &str, &str, &str)] = &[
    ("autostart", "Autostart", "boolean", "virtualization.virtualmachine"),
    ("replicated", "Replicated", "boolean", "virtualization.virtualmachine"),
    ("ha", "Failover", "boolean", "virtualization.virtualmachine"),
    ("backup", "Backup", "boolean", "virtualization.virtualdisk"),
    // DNS zone for addresses in the prefix
    ("dns_name", "DNS Name", "text", "ipam.prefix"),
];

const VM_ROLE_COLOR: &str = "2196f3";
const LXC_ROLE_COLOR: &str = "4caf50";

/// Configured role per guest kind: a name, or an integer role id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSettings {
    pub vm: Option<String>,
    pub lxc: Option<String>,
}

/// Resolved role ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleIds {
    pub vm: Option<u64>,
    pub lxc: Option<u64>,
}

impl RoleIds {
    pub fn for_kind(&self, kind: GuestKind) -> Option<u64> {
        match kind {
            GuestKind::Qemu => self.vm,
            GuestKind::Lxc => self.lxc,
        }
    }
}

pub struct Provisioner {
    client: NetboxClient,
    dry_run: bool,
}

impl Provisioner {
    pub fn new(client: NetboxClient, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Ensure custom fields and roles. Returns the role ids to stamp on VMs.
    #[instrument(skip(self, roles))]
    pub async fn provision(&self, roles: &RoleSettings) -> Result<RoleIds> {
        self.ensure_custom_fields().await?;
        self.ensure_roles(roles).await
    }

    pub async fn ensure_custom_fields(&self) -> Result<()> {
        let existing: Vec<CustomField> = self
            .client
            .list(Endpoint::CustomFields, &[])
            .await
            .map_err(|e| provisioning("listing custom fields", e))?;

        for (name, label, field_type, object_type) in CUSTOM_FIELDS {
            if existing.iter().any(|f| f.name == *name) {
                continue;
            }
            if self.dry_run {
                info!(dry_run = true, field = %name, "Would create custom field");
                continue;
            }
            let body = json!({
                "name": name,
                "label": label,
                "type": field_type,
                "object_types": [object_type],
                "required": false,
            });
            self.client
                .create(Endpoint::CustomFields, body, name)
                .await
                .map_err(|e| provisioning(&format!("creating custom field {}", name), e))?;
            info!(field = %name, "Created custom field");
        }
        Ok(())
    }

    pub async fn ensure_roles(&self, settings: &RoleSettings) -> Result<RoleIds> {
        let mut resolved: HashMap<String, Option<u64>> = HashMap::new();
        let mut ids = RoleIds::default();

        for (kind, value, color) in [
            (GuestKind::Qemu, &settings.vm, VM_ROLE_COLOR),
            (GuestKind::Lxc, &settings.lxc, LXC_ROLE_COLOR),
        ] {
            let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let id = match resolved.get(value) {
                Some(id) => *id,
                None => {
                    let id = self.ensure_role(kind, value, color).await?;
                    resolved.insert(value.to_string(), id);
                    id
                }
            };
            match kind {
                GuestKind::Qemu => ids.vm = id,
                GuestKind::Lxc => ids.lxc = id,
            }
        }
        Ok(ids)
    }

    async fn ensure_role(&self, kind: GuestKind, value: &str, color: &str) -> Result<Option<u64>> {
        if let Ok(id) = value.parse::<u64>() {
            return Ok(Some(id));
        }

        let slug = slugify(value);
        let roles: Vec<DeviceRole> = self
            .client
            .list(Endpoint::DeviceRoles, &[])
            .await
            .map_err(|e| provisioning("listing device roles", e))?;
        if let Some(role) = roles.iter().find(|r| r.name == value || r.slug == slug) {
            if !role.vm_role {
                warn!(role = %value, "Device role is not enabled for virtual machines");
            }
            return Ok(Some(role.id));
        }

        if self.dry_run {
            info!(dry_run = true, role = %value, kind = %kind, "Would create device role");
            return Ok(None);
        }
        let body = json!({
            "name": value,
            "slug": slug,
            "color": color,
            "vm_role": true,
            "description": format!("Proxmox {} guests", kind_label(kind)),
        });
        let id = self
            .client
            .create(Endpoint::DeviceRoles, body, value)
            .await
            .map_err(|e| provisioning(&format!("creating device role {}", value), e))?;
        info!(role = %value, id, "Created device role");
        Ok(Some(id))
    }
}

fn kind_label(kind: GuestKind) -> &'static str {
    match kind {
        GuestKind::Qemu => "QEMU",
        GuestKind::Lxc => "LXC",
    }
}

// Auth failures keep their class so callers can tell them apart.
fn provisioning(what: &str, error: NetboxError) -> EngineError {
    if error.is_auth() {
        EngineError::Target(error)
    } else {
        EngineError::Provisioning(format!("{}: {}", what, error))
    }
}
