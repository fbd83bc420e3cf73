//! Ownership arbitration for shared identifiers.
//!
//! A MAC or IP address claimed by a source entity may already belong to
//! another VM in NetBox. The claim wins only if the current owner is offline.

use std::fmt;

use crate::model::EntityKey;

/// Status of an identifier's owner as far as this pass knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerStatus {
    Active,
    Offline,
    /// Owner is outside the loaded scope
    Unknown,
}

impl OwnerStatus {
    /// From a NetBox VM status value.
    pub fn from_target_status(status: Option<&str>) -> Self {
        match status {
            Some("offline") => OwnerStatus::Offline,
            Some(_) => OwnerStatus::Active,
            None => OwnerStatus::Unknown,
        }
    }
}

impl fmt::Display for OwnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnerStatus::Active => "active",
            OwnerStatus::Offline => "offline",
            OwnerStatus::Unknown => "unknown",
        })
    }
}

/// Arbitration result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Take the identifier from the old owner
    Reassign,
    /// Leave it with the old owner and record a conflict
    Conflict,
}

/// Decide who keeps an identifier.
///
/// Only an offline owner gives it up. The claimant's own status does not
/// matter; an unknown owner is treated like an active one.
pub fn resolve(old: OwnerStatus, _new: OwnerStatus) -> Resolution {
    match old {
        OwnerStatus::Offline => Resolution::Reassign,
        OwnerStatus::Active | OwnerStatus::Unknown => Resolution::Conflict,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    MacAddress,
    IpAddress,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentifierKind::MacAddress => "MAC",
            IdentifierKind::IpAddress => "IP",
        })
    }
}

/// An assignment skipped because the identifier belongs to an active owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub kind: IdentifierKind,
    pub identifier: String,
    /// Entity that wanted the identifier
    pub entity: EntityKey,
    pub owner_name: String,
    /// NetBox VM id of the owner, if known
    pub owner_id: Option<u64>,
    pub owner_status: OwnerStatus,
    pub owner_interface: String,
    /// Owner is an in-scope VM the source no longer lists, e.g. the
    /// claimant's own record from before a rename
    pub owner_stale: bool,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} wanted by {} is held by {} (id {}, {}) on {}",
            self.kind,
            self.identifier,
            self.entity,
            self.owner_name,
            self.owner_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string()),
            self.owner_status,
            self.owner_interface
        )?;
        if self.owner_stale {
            f.write_str("; owner is no longer listed in Proxmox")?;
        }
        Ok(())
    }
}
