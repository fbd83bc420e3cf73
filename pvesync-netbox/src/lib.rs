//! # pvesync NetBox
//!
//! Boundary to the NetBox REST API.
//!
//! ```text
//! NetboxClient ──▶ Gateway ──▶ dyn Transport
//!  (typed, paged)   (1 lane,     ├── HttpTransport (reqwest)
//!                    delay,      └── MockNetbox    (in-memory)
//!                    retries)
//! ```

pub mod client;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod models;
pub mod transport;

pub use client::{Endpoint, NetboxClient, PAGE_SIZE};
pub use error::{NetboxError, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use mock::MockNetbox;
pub use transport::{ApiRequest, ApiResponse, HttpConfig, HttpTransport, Method, Transport};
