//! Change tracker for quick-check passes.
//!
//! Holds one fingerprint per guest for the lifetime of the process. The
//! fingerprint covers only fields the guest listing already returns, so a
//! quick check costs one listing per node and kind.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

use pvesync_proxmox::{GuestKind, GuestSummary};

/// Short digest of a guest's cheap listing fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash input: `kind:status:name:node:maxmem:maxdisk`.
    /// First 16 hex chars of SHA-256.
    pub fn of(kind: GuestKind, node: &str, summary: &GuestSummary) -> Self {
        let input = format!(
            "{}:{}:{}:{}:{}:{}",
            kind,
            summary.status,
            summary.display_name(),
            node,
            summary.maxmem,
            summary.maxdisk
        );
        let digest = Sha256::digest(input.as_bytes());
        Fingerprint(hex::encode(digest)[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Tracked {
    kind: GuestKind,
    fingerprint: Fingerprint,
}

/// Per-guest fingerprint store.
#[derive(Default)]
pub struct ChangeTracker {
    fingerprints: RwLock<HashMap<u32, Tracked>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against the stored fingerprint and store the new one.
    ///
    /// Unknown guests count as changed.
    pub async fn has_changed(&self, vmid: u32, kind: GuestKind, fingerprint: Fingerprint) -> bool {
        let mut fingerprints = self.fingerprints.write().await;
        let changed = fingerprints
            .get(&vmid)
            .map_or(true, |tracked| tracked.fingerprint != fingerprint);
        if changed {
            debug!(vmid, fingerprint = %fingerprint, "Guest fingerprint changed");
        }
        fingerprints.insert(vmid, Tracked { kind, fingerprint });
        changed
    }

    /// Store a fingerprint without comparing.
    pub async fn record(&self, vmid: u32, kind: GuestKind, fingerprint: Fingerprint) {
        self.fingerprints
            .write()
            .await
            .insert(vmid, Tracked { kind, fingerprint });
    }

    /// Forget a guest so the next quick check resyncs it.
    pub async fn invalidate(&self, vmid: u32) {
        self.fingerprints.write().await.remove(&vmid);
    }

    /// Drop guests not in `live`. Returns the dropped vmids.
    pub async fn retain(&self, live: &HashSet<u32>) -> Vec<u32> {
        let mut fingerprints = self.fingerprints.write().await;
        let gone: Vec<u32> = fingerprints
            .keys()
            .filter(|vmid| !live.contains(vmid))
            .copied()
            .collect();
        for vmid in &gone {
            fingerprints.remove(vmid);
        }
        gone
    }

    pub async fn len(&self) -> usize {
        self.fingerprints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fingerprints.read().await.is_empty()
    }

    /// Tracked `(vms, containers)`.
    pub async fn counts(&self) -> (u64, u64) {
        let fingerprints = self.fingerprints.read().await;
        fingerprints.values().fold((0, 0), |(vms, cts), tracked| match tracked.kind {
            GuestKind::Qemu => (vms + 1, cts),
            GuestKind::Lxc => (vms, cts + 1),
        })
    }
}
