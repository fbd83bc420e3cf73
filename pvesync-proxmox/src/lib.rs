//! # pvesync Proxmox
//!
//! Read-only boundary to the Proxmox VE API.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────┐
//! │        ProxmoxApi trait       │
//! └───────────────┬───────────────┘
//!                 │
//!         ┌───────┴────────┐
//!         ▼                ▼
//! ┌───────────────┐ ┌─────────────┐
//! │ ProxmoxClient │ │ MockProxmox │
//! │   (reqwest)   │ │ (in-memory) │
//! └───────────────┘ └─────────────┘
//! ```
//!
//! [`parse`] turns guest config strings into disk and interface entries.

pub mod client;
pub mod error;
pub mod mock;
pub mod parse;
pub mod traits;
pub mod types;

pub use client::{ProxmoxClient, ProxmoxConfig};
pub use error::{ProxmoxError, Result};
pub use mock::MockProxmox;
pub use traits::ProxmoxApi;
pub use types::*;
