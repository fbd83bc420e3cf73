//! reqwest-based Proxmox VE API client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ProxmoxError, Result};
use crate::traits::ProxmoxApi;
use crate::types::*;

/// Connection settings for [`ProxmoxClient`].
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    /// Host name or address, without scheme or port
    pub host: String,
    /// API user, e.g. `root@pam`
    pub user: String,
    /// API token id
    pub token_name: String,
    /// API token secret
    pub token_secret: String,
    /// Verify the server certificate
    pub verify_ssl: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ProxmoxConfig {
    fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}/api2/json", self.host.trim_end_matches('/'))
        } else {
            format!("https://{}:8006/api2/json", self.host)
        }
    }

    fn authorization(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user, self.token_name, self.token_secret
        )
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Proxmox VE API client using token authentication.
pub struct ProxmoxClient {
    base_url: String,
    authorization: String,
    http_client: reqwest::Client,
}

impl ProxmoxClient {
    /// Create a new client.
    pub fn new(config: &ProxmoxConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ProxmoxError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url(),
            authorization: config.authorization(),
            http_client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path = %path, "Proxmox GET");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", &self.authorization)
            .send()
            .await
            .map_err(|e| ProxmoxError::ConnectionFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProxmoxError::Unauthorized {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxmoxError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| ProxmoxError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ProxmoxApi for ProxmoxClient {
    #[instrument(skip(self))]
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.get("/nodes").await
    }

    #[instrument(skip(self))]
    async fn list_qemu(&self, node: &str) -> Result<Vec<GuestSummary>> {
        self.get(&format!("/nodes/{}/qemu", node)).await
    }

    #[instrument(skip(self))]
    async fn list_lxc(&self, node: &str) -> Result<Vec<GuestSummary>> {
        self.get(&format!("/nodes/{}/lxc", node)).await
    }

    async fn qemu_config(&self, node: &str, vmid: u32) -> Result<GuestConfig> {
        self.get(&format!("/nodes/{}/qemu/{}/config", node, vmid)).await
    }

    async fn lxc_config(&self, node: &str, vmid: u32) -> Result<GuestConfig> {
        self.get(&format!("/nodes/{}/lxc/{}/config", node, vmid)).await
    }

    async fn agent_network_interfaces(&self, node: &str, vmid: u32) -> Result<Vec<AgentInterface>> {
        let response: AgentNetworkResponse = self
            .get(&format!("/nodes/{}/qemu/{}/agent/network-get-interfaces", node, vmid))
            .await?;
        Ok(response.result)
    }

    async fn replicated_guests(&self, node: &str) -> Result<Vec<u32>> {
        let jobs: Vec<ReplicationJob> = self.get(&format!("/nodes/{}/replication", node)).await?;
        Ok(jobs.into_iter().map(|job| job.guest).collect())
    }

    async fn ha_guests(&self) -> Result<Vec<u32>> {
        let entries: Vec<HaStatusEntry> = self.get("/cluster/ha/status/current").await?;
        Ok(entries.iter().filter_map(HaStatusEntry::guest_id).collect())
    }

    async fn list_pools(&self) -> Result<Vec<PoolInfo>> {
        self.get("/pools").await
    }

    async fn guest_pools(&self) -> Result<Vec<(u32, String)>> {
        let resources: Vec<ClusterResource> = self.get("/cluster/resources?type=vm").await?;
        Ok(resources
            .into_iter()
            .filter_map(|r| Some((r.vmid?, r.pool.filter(|p| !p.is_empty())?)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> ProxmoxConfig {
        ProxmoxConfig {
            host: host.to_string(),
            user: "root@pam".to_string(),
            token_name: "sync".to_string(),
            token_secret: "s3cret".to_string(),
            verify_ssl: false,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_base_url_defaults_to_https_8006() {
        assert_eq!(config("pve.lab").base_url(), "https://pve.lab:8006/api2/json");
        assert_eq!(
            config("https://pve.lab:8443/").base_url(),
            "https://pve.lab:8443/api2/json"
        );
    }

    #[test]
    fn test_token_header() {
        assert_eq!(
            config("pve.lab").authorization(),
            "PVEAPIToken=root@pam!sync=s3cret"
        );
    }
}
