//! Configuration management for the sync daemon.
//!
//! Values come from three layers, highest first: command line or
//! environment, the YAML file, built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use pvesync_common::LogFormat;
use pvesync_engine::{Mode, RoleSettings, SyncOptions};
use pvesync_netbox::{GatewayConfig, HttpConfig};
use pvesync_proxmox::ProxmoxConfig;

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxmox: ProxmoxSection,
    pub netbox: NetboxSection,
    pub sync: SyncSection,
    pub roles: RolesSection,
    pub features: FeaturesSection,
    pub logging: LoggingSection,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply CLI and environment overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        set_opt(&mut self.proxmox.host, &args.pve_host);
        set_opt(&mut self.proxmox.user, &args.pve_user);
        set_opt(&mut self.proxmox.token_name, &args.pve_token);
        set_opt(&mut self.proxmox.token_secret, &args.pve_secret);
        set(&mut self.proxmox.verify_ssl, &args.pve_verify_ssl);

        set_opt(&mut self.netbox.url, &args.nb_url);
        set_opt(&mut self.netbox.token, &args.nb_token);
        set(&mut self.netbox.cluster_id, &args.nb_cluster_id);
        set(&mut self.netbox.delay_seconds, &args.nb_delay);
        set(&mut self.netbox.retry_total, &args.nb_retry_total);
        set(&mut self.netbox.retry_backoff, &args.nb_retry_backoff);

        set(&mut self.sync.sync_vms, &args.sync_vms);
        set(&mut self.sync.sync_lxc, &args.sync_lxc);
        set_opt(&mut self.sync.interval_seconds, &args.sync_interval);
        set_opt(&mut self.sync.quick_check_interval_seconds, &args.quick_check_interval);

        set_opt(&mut self.roles.vm, &args.vm_role);
        set_opt(&mut self.roles.lxc, &args.lxc_role);

        set(&mut self.features.dry_run, &args.dry_run);
        set(&mut self.features.enable_cleanup, &args.enable_cleanup);
        set(&mut self.features.enable_metrics, &args.enable_metrics);
        set(&mut self.features.metrics_port, &args.metrics_port);

        set(&mut self.logging.level, &args.log_level);
        set(&mut self.logging.format, &args.log_format);

        self
    }

    /// Check the merged configuration. Every problem is reported, not just
    /// the first one found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let required = [
            ("proxmox.host (PVE_API_HOST)", &self.proxmox.host),
            ("proxmox.user (PVE_API_USER)", &self.proxmox.user),
            ("proxmox.token_name (PVE_API_TOKEN)", &self.proxmox.token_name),
            ("proxmox.token_secret (PVE_API_SECRET)", &self.proxmox.token_secret),
            ("netbox.url (NB_API_URL)", &self.netbox.url),
            ("netbox.token (NB_API_TOKEN)", &self.netbox.token),
        ];
        for (name, value) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                errors.push(format!("{} is required", name));
            }
        }

        if !self.netbox.delay_seconds.is_finite() || self.netbox.delay_seconds < 0.0 {
            errors.push(format!(
                "netbox.delay_seconds must not be negative (got {})",
                self.netbox.delay_seconds
            ));
        }
        if self.netbox.retry_total == 0 {
            errors.push("netbox.retry_total must be at least 1".to_string());
        }
        if !self.netbox.retry_backoff.is_finite() || self.netbox.retry_backoff < 0.0 {
            errors.push(format!(
                "netbox.retry_backoff must not be negative (got {})",
                self.netbox.retry_backoff
            ));
        }
        if self.netbox.cluster_id == 0 {
            errors.push("netbox.cluster_id must be a positive id".to_string());
        }

        for (name, value) in [
            ("sync.interval_seconds", self.sync.interval_seconds),
            ("sync.quick_check_interval_seconds", self.sync.quick_check_interval_seconds),
        ] {
            if let Some(seconds) = value {
                if seconds <= 0 {
                    errors.push(format!("{} must be positive (got {})", name, seconds));
                }
            }
        }
        if self.sync.concurrency == 0 {
            errors.push("sync.concurrency must be at least 1".to_string());
        }

        if !self.sync.sync_vms && !self.sync.sync_lxc {
            errors.push("at least one of sync.sync_vms and sync.sync_lxc must be enabled".to_string());
        }

        if let Err(e) = self.logging.format.parse::<LogFormat>() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn proxmox_config(&self) -> ProxmoxConfig {
        ProxmoxConfig {
            host: self.proxmox.host.clone().unwrap_or_default(),
            user: self.proxmox.user.clone().unwrap_or_default(),
            token_name: self.proxmox.token_name.clone().unwrap_or_default(),
            token_secret: self.proxmox.token_secret.clone().unwrap_or_default(),
            verify_ssl: self.proxmox.verify_ssl,
            timeout: Duration::from_secs(self.proxmox.timeout_secs),
        }
    }

    pub fn netbox_http(&self) -> HttpConfig {
        HttpConfig {
            url: self.netbox.url.clone().unwrap_or_default(),
            token: self.netbox.token.clone().unwrap_or_default(),
            verify_ssl: self.netbox.verify_ssl,
            timeout: Duration::from_secs(self.netbox.timeout_secs),
        }
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            delay: Duration::from_secs_f64(self.netbox.delay_seconds.max(0.0)),
            retry_total: self.netbox.retry_total.max(1),
            backoff_factor: self.netbox.retry_backoff.max(0.0),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            cluster_id: self.netbox.cluster_id,
            sync_vms: self.sync.sync_vms,
            sync_lxc: self.sync.sync_lxc,
            dry_run: self.features.dry_run,
            enable_cleanup: self.features.enable_cleanup,
            concurrency: self.sync.concurrency.max(1),
        }
    }

    pub fn role_settings(&self) -> RoleSettings {
        RoleSettings {
            vm: self.roles.vm.clone().filter(|r| !r.trim().is_empty()),
            lxc: self.roles.lxc.clone().filter(|r| !r.trim().is_empty()),
        }
    }

    /// Scheduler mode derived from the configured intervals.
    pub fn mode(&self) -> Mode {
        let seconds = |value: Option<i64>| {
            value
                .filter(|s| *s > 0)
                .map(|s| Duration::from_secs(s.unsigned_abs()))
        };
        Mode::from_intervals(
            seconds(self.sync.interval_seconds),
            seconds(self.sync.quick_check_interval_seconds),
        )
    }

    pub fn log_format(&self) -> LogFormat {
        self.logging.format.parse().unwrap_or_default()
    }
}

/// Proxmox VE API access.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxmoxSection {
    pub host: Option<String>,
    pub user: Option<String>,
    pub token_name: Option<String>,
    pub token_secret: Option<String>,
    /// Proxmox VE ships a self-signed certificate, so this is off by default
    pub verify_ssl: bool,
    pub timeout_secs: u64,
}

impl Default for ProxmoxSection {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            token_name: None,
            token_secret: None,
            verify_ssl: false,
            timeout_secs: 30,
        }
    }
}

/// NetBox API access and request pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetboxSection {
    pub url: Option<String>,
    pub token: Option<String>,
    pub verify_ssl: bool,
    pub cluster_id: u64,
    /// Minimum spacing between requests
    pub delay_seconds: f64,
    /// Total attempts per request
    pub retry_total: u32,
    pub retry_backoff: f64,
    pub timeout_secs: u64,
}

impl Default for NetboxSection {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            verify_ssl: true,
            cluster_id: 1,
            delay_seconds: 0.2,
            retry_total: 5,
            retry_backoff: 1.0,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub sync_vms: bool,
    pub sync_lxc: bool,
    /// Seconds between full syncs; unset runs a single pass
    pub interval_seconds: Option<i64>,
    /// Seconds between quick checks; setting it enables combined mode
    pub quick_check_interval_seconds: Option<i64>,
    /// Parallel per-guest Proxmox VE queries
    pub concurrency: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            sync_vms: true,
            sync_lxc: true,
            interval_seconds: None,
            quick_check_interval_seconds: None,
            concurrency: 4,
        }
    }
}

/// Device role per guest kind, by name or numeric id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RolesSection {
    pub vm: Option<String>,
    pub lxc: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesSection {
    pub dry_run: bool,
    pub enable_cleanup: bool,
    pub enable_metrics: bool,
    pub metrics_port: u16,
}

impl Default for FeaturesSection {
    fn default() -> Self {
        Self {
            dry_run: false,
            enable_cleanup: false,
            enable_metrics: false,
            metrics_port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    fn complete() -> Config {
        let mut config = Config::default();
        config.proxmox.host = Some("pve.example.com".into());
        config.proxmox.user = Some("root@pam".into());
        config.proxmox.token_name = Some("sync".into());
        config.proxmox.token_secret = Some("secret".into());
        config.netbox.url = Some("https://netbox.example.com".into());
        config.netbox.token = Some("token".into());
        config
    }

    #[test]
    fn test_defaults_match_deployment_defaults() {
        let config = Config::default();
        assert!(!config.proxmox.verify_ssl);
        assert_eq!(config.netbox.cluster_id, 1);
        assert_eq!(config.netbox.retry_total, 5);
        assert!((config.netbox.delay_seconds - 0.2).abs() < f64::EPSILON);
        assert!(config.sync.sync_vms && config.sync.sync_lxc);
        assert!(!config.features.dry_run);
        assert!(!config.features.enable_cleanup);
        assert_eq!(config.features.metrics_port, 9090);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.mode(), Mode::SingleRun);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_sections() {
        let file = write_config(
            "netbox:\n  url: https://nb.local\n  cluster_id: 7\nsync:\n  interval_seconds: 600\n",
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.netbox.url.as_deref(), Some("https://nb.local"));
        assert_eq!(config.netbox.cluster_id, 7);
        assert_eq!(config.netbox.retry_total, 5);
        assert!(config.sync.sync_lxc);
        assert_eq!(config.mode(), Mode::Simple { full: Duration::from_secs(600) });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_config("netbox: [unclosed");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let file = write_config("netbox:\n  cluster_id: 7\nfeatures:\n  dry_run: false\n");
        let args = Args {
            nb_cluster_id: Some(3),
            dry_run: Some(true),
            ..Args::default()
        };

        let config = Config::load(file.path()).unwrap().with_cli_overrides(&args);

        assert_eq!(config.netbox.cluster_id, 3);
        assert!(config.features.dry_run);
        // untouched values survive
        assert_eq!(config.netbox.retry_total, 5);
    }

    #[test]
    fn test_validation_lists_every_missing_credential() {
        let errors = Config::default().validate().unwrap_err();
        assert_eq!(errors.len(), 6, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("PVE_API_HOST")));
        assert!(errors.iter().any(|e| e.contains("NB_API_TOKEN")));
    }

    #[test]
    fn test_validation_rejects_bad_numbers() {
        let mut config = complete();
        config.sync.interval_seconds = Some(0);
        config.sync.quick_check_interval_seconds = Some(-30);
        config.netbox.retry_total = 0;
        config.netbox.delay_seconds = -1.0;

        let errors = config.validate().unwrap_err();

        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("retry_total")));
        assert!(errors.iter().any(|e| e.contains("delay_seconds")));
    }

    #[test]
    fn test_complete_config_validates() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn test_quick_interval_alone_selects_combined_mode_with_hourly_full() {
        let mut config = complete();
        config.sync.quick_check_interval_seconds = Some(60);
        assert_eq!(
            config.mode(),
            Mode::Combined {
                quick: Duration::from_secs(60),
                full: Duration::from_secs(3600),
            }
        );
    }

    #[test]
    fn test_numeric_and_blank_roles() {
        let mut config = complete();
        config.roles.vm = Some("12".into());
        config.roles.lxc = Some("  ".into());
        let roles = config.role_settings();
        assert_eq!(roles.vm.as_deref(), Some("12"));
        assert_eq!(roles.lxc, None);
    }

    #[test]
    fn test_gateway_settings_follow_netbox_section() {
        let mut config = complete();
        config.netbox.delay_seconds = 0.5;
        config.netbox.retry_total = 3;
        config.netbox.retry_backoff = 2.0;
        let gateway = config.gateway();
        assert_eq!(gateway.delay, Duration::from_millis(500));
        assert_eq!(gateway.retry_total, 3);
        assert_eq!(gateway.backoff(2), Duration::from_secs(4));
    }
}
