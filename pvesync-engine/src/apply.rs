//! Plan execution.
//!
//! Operations run in plan order through the gateway. Symbolic references
//! are resolved as creates succeed; an operation whose reference cannot be
//! resolved is skipped. In dry-run mode nothing is sent and every create is
//! assumed to succeed, so the counts match a live run.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

use pvesync_netbox::NetboxClient;

use crate::error::{EngineError, Result};
use crate::plan::{Action, ObjectType, Operation, Plan, Ref};
use crate::scheduler::Shutdown;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Summary of an applied plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub counts: BTreeMap<ObjectType, Counts>,
    pub conflicts: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Stopped early on shutdown
    pub interrupted: bool,
    /// Entities with at least one failed, skipped or unapplied operation
    pub incomplete: BTreeSet<String>,
}

impl Outcome {
    pub fn counts_for(&self, object: ObjectType) -> Counts {
        self.counts.get(&object).copied().unwrap_or_default()
    }

    pub fn created(&self) -> u64 {
        self.counts.values().map(|c| c.created).sum()
    }

    pub fn updated(&self) -> u64 {
        self.counts.values().map(|c| c.updated).sum()
    }

    pub fn deleted(&self) -> u64 {
        self.counts.values().map(|c| c.deleted).sum()
    }

    pub fn mutations(&self) -> u64 {
        self.created() + self.updated() + self.deleted()
    }

    /// Conflicts, failed and skipped operations.
    pub fn errors(&self) -> u64 {
        self.conflicts + self.failed + self.skipped
    }

    pub fn is_complete(&self, entity: &str) -> bool {
        !self.incomplete.contains(entity)
    }

    pub fn merge(&mut self, other: Outcome) {
        for (object, counts) in other.counts {
            let entry = self.counts.entry(object).or_default();
            entry.created += counts.created;
            entry.updated += counts.updated;
            entry.deleted += counts.deleted;
        }
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.interrupted |= other.interrupted;
        self.incomplete.extend(other.incomplete);
    }

    fn count(&mut self, operation: &Operation) {
        let entry = self.counts.entry(operation.object).or_default();
        match operation.action {
            Action::Create { .. } => entry.created += 1,
            Action::Update { .. } => entry.updated += 1,
            Action::Delete { .. } => entry.deleted += 1,
        }
    }
}

/// Executes plans against NetBox.
#[derive(Clone)]
pub struct Applier {
    client: NetboxClient,
    dry_run: bool,
}

impl Applier {
    pub fn new(client: NetboxClient, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply `plan`, checking `shutdown` before every operation.
    ///
    /// Per-operation failures are counted; authentication failures abort.
    pub async fn apply(&self, plan: &Plan, shutdown: &Shutdown) -> Result<Outcome> {
        let mut outcome = Outcome {
            conflicts: plan.conflicts.len() as u64,
            ..Outcome::default()
        };
        let mut created: HashMap<usize, u64> = HashMap::new();

        for (index, operation) in plan.operations.iter().enumerate() {
            if shutdown.is_triggered() {
                warn!(remaining = plan.operations.len() - index, "Shutdown requested, stopping apply");
                outcome.interrupted = true;
                outcome
                    .incomplete
                    .extend(plan.operations[index..].iter().map(|op| op.entity.clone()));
                break;
            }

            let Some(body) = resolve_body(operation, &created) else {
                warn!(entity = %operation.entity, operation = %operation, "Skipping, a dependency was not created");
                outcome.skipped += 1;
                outcome.incomplete.insert(operation.entity.clone());
                continue;
            };
            let target = match operation.action {
                Action::Update { target } => match resolve(target, &created) {
                    Some(id) => Some(id),
                    None => {
                        warn!(entity = %operation.entity, operation = %operation, "Skipping, target was not created");
                        outcome.skipped += 1;
                        outcome.incomplete.insert(operation.entity.clone());
                        continue;
                    }
                },
                _ => None,
            };

            if self.dry_run {
                info!(dry_run = true, entity = %operation.entity, operation = %operation, body = %body, "Would apply");
                if let Action::Create { pending } = operation.action {
                    created.insert(pending, 0);
                }
                outcome.count(operation);
                continue;
            }

            match self.execute(operation, target, body).await {
                Ok(new_id) => {
                    if let (Action::Create { pending }, Some(id)) = (operation.action, new_id) {
                        created.insert(pending, id);
                    }
                    info!(entity = %operation.entity, operation = %operation, "Applied");
                    outcome.count(operation);
                }
                Err(e) if e.is_auth() => return Err(EngineError::Target(e)),
                Err(e) => {
                    error!(entity = %operation.entity, operation = %operation, error = %e, "Operation failed");
                    outcome.failed += 1;
                    outcome.incomplete.insert(operation.entity.clone());
                }
            }
        }

        debug!(
            created = outcome.created(),
            updated = outcome.updated(),
            deleted = outcome.deleted(),
            errors = outcome.errors(),
            "Plan applied"
        );
        Ok(outcome)
    }

    async fn execute(&self, operation: &Operation, target: Option<u64>, body: Value) -> pvesync_netbox::Result<Option<u64>> {
        let endpoint = operation.object.endpoint();
        match (operation.action, target) {
            (Action::Create { .. }, _) => self.client.create(endpoint, body, &operation.entity).await.map(Some),
            (Action::Update { .. }, Some(id)) => self
                .client
                .update(endpoint, id, body, &operation.entity)
                .await
                .map(|_| None),
            (Action::Delete { id }, _) => self.client.delete(endpoint, id, &operation.entity).await.map(|_| None),
            (Action::Update { .. }, None) => Ok(None),
        }
    }
}

fn resolve(reference: Ref, created: &HashMap<usize, u64>) -> Option<u64> {
    match reference {
        Ref::Existing(id) => Some(id),
        Ref::Pending(n) => created.get(&n).copied(),
    }
}

fn resolve_body(operation: &Operation, created: &HashMap<usize, u64>) -> Option<Value> {
    let mut body = operation.body.clone();
    for (field, reference) in &operation.refs {
        let id = resolve(*reference, created)?;
        body.insert((*field).to_string(), json!(id));
    }
    Some(Value::Object(body))
}
