//! Engine settings.

/// What to sync and how.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// NetBox cluster the guests belong to; also the cleanup scope
    pub cluster_id: u64,
    pub sync_vms: bool,
    pub sync_lxc: bool,
    /// Compute and log mutations without sending them
    pub dry_run: bool,
    /// Delete in-scope NetBox VMs missing from the source during full passes
    pub enable_cleanup: bool,
    /// Parallel per-guest source queries
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            sync_vms: true,
            sync_lxc: true,
            dry_run: false,
            enable_cleanup: false,
            concurrency: 4,
        }
    }
}
