//! # pvesync Common
//!
//! Shared utilities for the pvesync crates.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use pvesync_common::{init_logging, log_section};
//!
//! init_logging("info").unwrap();
//! log_section("Initial full sync");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, log_section, LogFormat};
