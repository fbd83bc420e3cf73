//! Pass orchestration.
//!
//! A full pass reads both sides, plans every entity, optionally plans
//! cleanup and applies the result. A quick pass lists guests only and
//! resyncs the ones whose fingerprint moved. Both hold the pass lock for
//! their whole duration.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use pvesync_common::log_section;
use pvesync_netbox::NetboxClient;
use pvesync_proxmox::{GuestKind, ProxmoxApi};

use crate::apply::{Applier, Outcome};
use crate::cleanup::plan_cleanup;
use crate::error::{EngineError, Result};
use crate::inventory::InventoryLoader;
use crate::metrics::SyncMetrics;
use crate::options::SyncOptions;
use crate::plan::Planner;
use crate::provision::RoleIds;
use crate::scheduler::{PassRunner, Shutdown};
use crate::source::{GuestExtras, GuestRef, SnapshotBuilder};
use crate::tracker::ChangeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Full,
    Quick,
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub kind: PassKind,
    /// Guests listed (full) or checked (quick)
    pub entities_seen: usize,
    pub vms_synced: u64,
    pub containers_synced: u64,
    /// Guests whose fingerprint changed (quick passes only)
    pub changed: usize,
    pub outcome: Outcome,
    pub duration: Duration,
}

impl PassReport {
    pub fn empty(kind: PassKind) -> Self {
        Self {
            kind,
            entities_seen: 0,
            vms_synced: 0,
            containers_synced: 0,
            changed: 0,
            outcome: Outcome::default(),
            duration: Duration::ZERO,
        }
    }
}

/// The reconciliation engine.
pub struct Engine {
    source: SnapshotBuilder,
    loader: InventoryLoader,
    applier: Applier,
    options: SyncOptions,
    roles: RoleIds,
    tracker: Arc<ChangeTracker>,
    metrics: Arc<SyncMetrics>,
    shutdown: Shutdown,
    pass_lock: Mutex<()>,
}

impl Engine {
    pub fn new(api: Arc<dyn ProxmoxApi>, client: NetboxClient, options: SyncOptions) -> Self {
        Self {
            source: SnapshotBuilder::new(api, options.clone()),
            loader: InventoryLoader::new(client.clone(), options.cluster_id),
            applier: Applier::new(client, options.dry_run),
            options,
            roles: RoleIds::default(),
            tracker: Arc::new(ChangeTracker::new()),
            metrics: Arc::new(SyncMetrics::new()),
            shutdown: Shutdown::never(),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn with_roles(mut self, roles: RoleIds) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<ChangeTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    // =========================================================================
    // Full pass
    // =========================================================================

    #[instrument(skip(self), fields(dry_run = self.options.dry_run))]
    pub async fn full_pass(&self) -> Result<PassReport> {
        let _pass = self.pass_lock.lock().await;
        log_section("Full sync");
        self.metrics.record_full_sync();

        let result = self.run_full().await;
        match &result {
            Ok(report) => {
                self.metrics.record_full_sync_end(report.duration, chrono::Utc::now().timestamp().max(0) as u64);
                info!(
                    seen = report.entities_seen,
                    vms = report.vms_synced,
                    containers = report.containers_synced,
                    created = report.outcome.created(),
                    updated = report.outcome.updated(),
                    deleted = report.outcome.deleted(),
                    conflicts = report.outcome.conflicts,
                    failed = report.outcome.failed,
                    duration_ms = report.duration.as_millis() as u64,
                    "Full sync complete"
                );
            }
            Err(_) => self.metrics.record_errors(1),
        }
        result
    }

    async fn run_full(&self) -> Result<PassReport> {
        let started = Instant::now();

        let (snapshot, inventory) = tokio::try_join!(
            async { self.source.build().await.map_err(EngineError::from) },
            async { self.loader.load().await.map_err(EngineError::from) },
        )?;

        let listed = snapshot.listed_names();
        let mut planner = Planner::new(&inventory, self.roles).with_listing(&listed);
        planner.plan_pools(&snapshot.pools);
        for entity in &snapshot.entities {
            planner.plan_entity(entity);
        }
        let mut plan = planner.finish();
        if self.options.enable_cleanup {
            plan.operations.extend(plan_cleanup(&inventory, &listed));
        }
        info!(
            entities = snapshot.entities.len(),
            operations = plan.len(),
            conflicts = plan.conflicts.len(),
            "Plan ready"
        );

        let outcome = self.applier.apply(&plan, &self.shutdown).await?;

        let mut report = PassReport::empty(PassKind::Full);
        report.entities_seen = snapshot.listed.len();
        for entity in &snapshot.entities {
            if outcome.is_complete(&entity.name) {
                self.tracker.record(entity.vmid, entity.kind, entity.fingerprint.clone()).await;
                match entity.kind {
                    GuestKind::Qemu => report.vms_synced += 1,
                    GuestKind::Lxc => report.containers_synced += 1,
                }
            } else {
                self.tracker.invalidate(entity.vmid).await;
            }
        }
        for vmid in &snapshot.skipped {
            self.tracker.invalidate(*vmid).await;
        }

        let live: HashSet<u32> = snapshot.entities.iter().map(|e| e.vmid).collect();
        let dropped = self.tracker.retain(&live).await;
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Stopped tracking removed guests");
        }

        self.metrics.record_synced(report.vms_synced, report.containers_synced);
        self.metrics
            .record_errors(outcome.errors() + snapshot.skipped.len() as u64);
        self.publish_tracked().await;

        report.outcome = outcome;
        report.duration = started.elapsed();
        Ok(report)
    }

    // =========================================================================
    // Quick pass
    // =========================================================================

    #[instrument(skip(self), fields(dry_run = self.options.dry_run))]
    pub async fn quick_pass(&self) -> Result<PassReport> {
        let _pass = self.pass_lock.lock().await;
        let started = Instant::now();

        let guests = self.source.list_guests(false).await?;
        let live: HashSet<u32> = guests.iter().map(GuestRef::vmid).collect();
        let dropped = self.tracker.retain(&live).await;
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Guests disappeared, left for the next full sync");
        }

        let mut changed = Vec::new();
        for guest in &guests {
            if self.tracker.has_changed(guest.vmid(), guest.kind, guest.fingerprint()).await {
                changed.push(guest);
            }
        }
        self.metrics.record_quick_check(changed.len() as u64);

        let mut report = PassReport::empty(PassKind::Quick);
        report.entities_seen = guests.len();
        report.changed = changed.len();

        if !changed.is_empty() {
            info!(changed = changed.len(), checked = guests.len(), "Quick check found changes");
            let nodes: HashSet<String> = changed.iter().map(|g| g.node.clone()).collect();
            let extras = self.source.extras(&nodes).await;
            // The quick listing skips disabled kinds, so it is only complete with both enabled.
            let listed: Option<HashSet<String>> = (self.options.sync_vms && self.options.sync_lxc)
                .then(|| guests.iter().map(|g| g.summary.display_name()).collect());

            for (index, guest) in changed.iter().enumerate() {
                if self.shutdown.is_triggered() {
                    warn!("Shutdown requested, stopping quick check");
                    for rest in &changed[index..] {
                        self.tracker.invalidate(rest.vmid()).await;
                    }
                    report.outcome.interrupted = true;
                    break;
                }

                match self.resync(guest, &extras, listed.as_ref()).await {
                    Ok((name, outcome)) => {
                        if outcome.is_complete(&name) {
                            match guest.kind {
                                GuestKind::Qemu => report.vms_synced += 1,
                                GuestKind::Lxc => report.containers_synced += 1,
                            }
                        } else {
                            self.tracker.invalidate(guest.vmid()).await;
                        }
                        report.outcome.merge(outcome);
                    }
                    Err(e) => {
                        self.tracker.invalidate(guest.vmid()).await;
                        if e.is_auth() {
                            self.metrics.record_errors(1);
                            return Err(e);
                        }
                        warn!(vmid = guest.vmid(), error = %e, "Scoped resync failed");
                        report.outcome.failed += 1;
                    }
                }
            }
        }

        self.metrics.record_synced(report.vms_synced, report.containers_synced);
        self.metrics.record_errors(report.outcome.errors());
        self.publish_tracked().await;

        report.duration = started.elapsed();
        Ok(report)
    }

    /// Build, load, plan and apply a single guest.
    async fn resync(
        &self,
        guest: &GuestRef,
        extras: &GuestExtras,
        listed: Option<&HashSet<String>>,
    ) -> Result<(String, Outcome)> {
        let entity = self.source.build_one(guest, extras).await?;
        let inventory = self.loader.load_one(&entity).await?;
        let mut planner = Planner::new(&inventory, self.roles);
        if let Some(listed) = listed {
            planner = planner.with_listing(listed);
        }
        planner.plan_entity(&entity);
        let plan = planner.finish();
        info!(
            vmid = entity.vmid,
            entity = %entity.name,
            operations = plan.len(),
            "Scoped resync"
        );
        let outcome = self.applier.apply(&plan, &self.shutdown).await?;
        Ok((entity.name, outcome))
    }

    async fn publish_tracked(&self) {
        let (vms, containers) = self.tracker.counts().await;
        self.metrics.set_tracked(vms, containers);
    }
}

#[async_trait]
impl PassRunner for Engine {
    async fn full_pass(&self) -> Result<PassReport> {
        Engine::full_pass(self).await
    }

    async fn quick_pass(&self) -> Result<PassReport> {
        Engine::quick_pass(self).await
    }
}
