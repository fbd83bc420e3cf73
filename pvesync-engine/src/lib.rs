//! # pvesync Engine
//!
//! Reconciles Proxmox VE guests into NetBox.
//!
//! ```text
//!              ┌──────────────┐
//!              │  Scheduler   │  single run / simple / combined
//!              └──────┬───────┘
//!                     ▼
//!              ┌──────────────┐
//!              │    Engine    │  pass lock, tracker, metrics
//!              └──────┬───────┘
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!  SnapshotBuilder        InventoryLoader
//!  (ProxmoxApi)           (NetboxClient)
//!          └──────────┬──────────┘
//!                     ▼
//!              plan + cleanup ──▶ Applier ──▶ Gateway
//! ```

pub mod apply;
pub mod cleanup;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod model;
pub mod options;
pub mod plan;
pub mod provision;
pub mod scheduler;
pub mod source;
pub mod tracker;

pub use apply::{Applier, Counts, Outcome};
pub use conflict::{resolve, Conflict, IdentifierKind, OwnerStatus, Resolution};
pub use engine::{Engine, PassKind, PassReport};
pub use error::{EngineError, Result};
pub use inventory::{InventoryLoader, TargetInventory};
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use model::{DiskSpec, EntityKey, InterfaceSpec, PowerState, SourceEntity};
pub use options::SyncOptions;
pub use plan::{plan, Action, ObjectType, Operation, Plan, Planner, Ref};
pub use provision::{Provisioner, RoleIds, RoleSettings};
pub use scheduler::{shutdown_channel, Mode, PassRunner, Scheduler, Shutdown, ShutdownTrigger};
pub use source::{GuestExtras, GuestRef, Snapshot, SnapshotBuilder};
pub use tracker::{ChangeTracker, Fingerprint};
