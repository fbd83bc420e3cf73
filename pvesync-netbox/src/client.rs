//! Typed NetBox client on top of the [`Gateway`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{NetboxError, Result};
use crate::gateway::Gateway;
use crate::transport::ApiRequest;

/// Page size for paged listings.
pub const PAGE_SIZE: usize = 250;

/// NetBox object collections used by the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    VirtualMachines,
    VmInterfaces,
    VirtualDisks,
    IpAddresses,
    MacAddresses,
    Prefixes,
    Vlans,
    Devices,
    DeviceRoles,
    Tags,
    CustomFields,
}

impl Endpoint {
    pub const ALL: [Endpoint; 11] = [
        Endpoint::VirtualMachines,
        Endpoint::VmInterfaces,
        Endpoint::VirtualDisks,
        Endpoint::IpAddresses,
        Endpoint::MacAddresses,
        Endpoint::Prefixes,
        Endpoint::Vlans,
        Endpoint::Devices,
        Endpoint::DeviceRoles,
        Endpoint::Tags,
        Endpoint::CustomFields,
    ];

    /// Collection path, with leading and trailing slash.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::VirtualMachines => "/api/virtualization/virtual-machines/",
            Endpoint::VmInterfaces => "/api/virtualization/interfaces/",
            Endpoint::VirtualDisks => "/api/virtualization/virtual-disks/",
            Endpoint::IpAddresses => "/api/ipam/ip-addresses/",
            Endpoint::MacAddresses => "/api/dcim/mac-addresses/",
            Endpoint::Prefixes => "/api/ipam/prefixes/",
            Endpoint::Vlans => "/api/ipam/vlans/",
            Endpoint::Devices => "/api/dcim/devices/",
            Endpoint::DeviceRoles => "/api/dcim/device-roles/",
            Endpoint::Tags => "/api/extras/tags/",
            Endpoint::CustomFields => "/api/extras/custom-fields/",
        }
    }

    pub fn object_path(&self, id: u64) -> String {
        format!("{}{}/", self.path(), id)
    }

    /// Resolve a request path back to its collection and object id.
    pub fn from_path(path: &str) -> Option<(Endpoint, Option<u64>)> {
        Endpoint::ALL.iter().find_map(|endpoint| {
            let rest = path.strip_prefix(endpoint.path())?;
            let rest = rest.trim_end_matches('/');
            if rest.is_empty() {
                Some((*endpoint, None))
            } else {
                rest.parse().ok().map(|id| (*endpoint, Some(id)))
            }
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endpoint::VirtualMachines => "virtual-machines",
            Endpoint::VmInterfaces => "interfaces",
            Endpoint::VirtualDisks => "virtual-disks",
            Endpoint::IpAddresses => "ip-addresses",
            Endpoint::MacAddresses => "mac-addresses",
            Endpoint::Prefixes => "prefixes",
            Endpoint::Vlans => "vlans",
            Endpoint::Devices => "devices",
            Endpoint::DeviceRoles => "device-roles",
            Endpoint::Tags => "tags",
            Endpoint::CustomFields => "custom-fields",
        };
        f.write_str(name)
    }
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
}

/// NetBox API client. All calls go through one shared gateway.
#[derive(Clone)]
pub struct NetboxClient {
    gateway: Arc<Gateway>,
}

impl NetboxClient {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Fetch every object matching `filters`, following pages until `next` is null.
    #[instrument(skip(self, filters), fields(endpoint = %endpoint))]
    pub async fn list_all(&self, endpoint: Endpoint, filters: &[(&str, String)]) -> Result<Vec<Value>> {
        let mut objects = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut request = ApiRequest::get(endpoint.path())
                .with_query("limit", PAGE_SIZE.to_string())
                .with_query("offset", offset.to_string());
            for (key, value) in filters {
                request = request.with_query(*key, value.clone());
            }

            let body = self.gateway.execute(&request).await?;
            let page: Page = serde_json::from_value(body).map_err(|e| NetboxError::Decode {
                operation: request.operation(),
                message: e.to_string(),
            })?;

            let received = page.results.len();
            objects.extend(page.results);
            offset += received;

            if page.next.is_none() || received == 0 {
                break;
            }
        }

        debug!(count = objects.len(), "Listed NetBox objects");
        Ok(objects)
    }

    /// Typed variant of [`NetboxClient::list_all`].
    pub async fn list<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        self.list_all(endpoint, filters)
            .await?
            .into_iter()
            .map(|value| decode(endpoint, value))
            .collect()
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: Endpoint, id: u64) -> Result<T> {
        let body = self
            .gateway
            .execute(&ApiRequest::get(endpoint.object_path(id)))
            .await?;
        decode(endpoint, body)
    }

    /// Create an object and return its id.
    pub async fn create(&self, endpoint: Endpoint, body: Value, entity: &str) -> Result<u64> {
        let request = ApiRequest::post(endpoint.path(), body).for_entity(entity);
        let created = self.gateway.execute(&request).await?;
        created
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| NetboxError::Decode {
                operation: request.operation(),
                message: "response has no id".to_string(),
            })
    }

    /// Partially update an object.
    pub async fn update(&self, endpoint: Endpoint, id: u64, body: Value, entity: &str) -> Result<()> {
        let request = ApiRequest::patch(endpoint.object_path(id), body).for_entity(entity);
        self.gateway.execute(&request).await?;
        Ok(())
    }

    pub async fn delete(&self, endpoint: Endpoint, id: u64, entity: &str) -> Result<()> {
        let request = ApiRequest::delete(endpoint.object_path(id)).for_entity(entity);
        self.gateway.execute(&request).await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(endpoint: Endpoint, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| NetboxError::Decode {
        operation: format!("GET {}", endpoint.path()),
        message: e.to_string(),
    })
}
