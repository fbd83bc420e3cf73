//! Command-line argument parsing.
//!
//! Every option falls back to an environment variable, so the daemon can be
//! configured entirely from a container environment. Unset options leave the
//! config file value (or its default) alone.

use clap::builder::BoolishValueParser;
use clap::Parser;

/// Default location of the optional configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pvesync/pvesync.yaml";

/// pvesync - Proxmox VE to NetBox synchronization daemon
#[derive(Parser, Debug, Default)]
#[command(name = "pvesync")]
#[command(about = "Keeps NetBox virtual machines in step with a Proxmox VE cluster")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional when using the default path)
    #[arg(short, long, env = "PVESYNC_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format (pretty, json)
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,

    // ========================================================================
    // Proxmox VE
    // ========================================================================

    /// Proxmox VE host name or address
    #[arg(long, env = "PVE_API_HOST")]
    pub pve_host: Option<String>,

    /// Proxmox VE API user, e.g. root@pam
    #[arg(long, env = "PVE_API_USER")]
    pub pve_user: Option<String>,

    /// Proxmox VE API token id
    #[arg(long, env = "PVE_API_TOKEN")]
    pub pve_token: Option<String>,

    /// Proxmox VE API token secret
    #[arg(long, env = "PVE_API_SECRET", hide_env_values = true)]
    pub pve_secret: Option<String>,

    /// Verify the Proxmox VE TLS certificate
    #[arg(long, env = "PVE_API_VERIFY_SSL", value_parser = BoolishValueParser::new())]
    pub pve_verify_ssl: Option<bool>,

    // ========================================================================
    // NetBox
    // ========================================================================

    /// NetBox base URL
    #[arg(long, env = "NB_API_URL")]
    pub nb_url: Option<String>,

    /// NetBox API token
    #[arg(long, env = "NB_API_TOKEN", hide_env_values = true)]
    pub nb_token: Option<String>,

    /// NetBox cluster the guests belong to
    #[arg(long, env = "NB_CLUSTER_ID")]
    pub nb_cluster_id: Option<u64>,

    /// Minimum seconds between NetBox requests
    #[arg(long, env = "NB_API_DELAY_SECONDS", allow_negative_numbers = true)]
    pub nb_delay: Option<f64>,

    /// Total attempts per NetBox request
    #[arg(long, env = "NB_API_RETRY_TOTAL")]
    pub nb_retry_total: Option<u32>,

    /// Backoff factor in seconds between NetBox retries
    #[arg(long, env = "NB_API_RETRY_BACKOFF")]
    pub nb_retry_backoff: Option<f64>,

    // ========================================================================
    // Sync behaviour
    // ========================================================================

    /// Sync QEMU virtual machines
    #[arg(long, env = "SYNC_VMS", value_parser = BoolishValueParser::new())]
    pub sync_vms: Option<bool>,

    /// Sync LXC containers
    #[arg(long, env = "SYNC_LXC", value_parser = BoolishValueParser::new())]
    pub sync_lxc: Option<bool>,

    /// Seconds between full syncs (unset: run once and exit)
    #[arg(long, env = "SYNC_INTERVAL_SECONDS", allow_negative_numbers = true)]
    pub sync_interval: Option<i64>,

    /// Seconds between quick checks
    #[arg(long, env = "QUICK_CHECK_INTERVAL_SECONDS", allow_negative_numbers = true)]
    pub quick_check_interval: Option<i64>,

    /// Role for virtual machines: a name, or an existing role id
    #[arg(long, env = "VM_ROLE")]
    pub vm_role: Option<String>,

    /// Role for containers: a name, or an existing role id
    #[arg(long, env = "LXC_ROLE")]
    pub lxc_role: Option<String>,

    // ========================================================================
    // Features
    // ========================================================================

    /// Compute changes without writing to NetBox
    #[arg(
        long,
        env = "DRY_RUN",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub dry_run: Option<bool>,

    /// Delete in-cluster NetBox VMs that no longer exist in Proxmox VE
    #[arg(
        long,
        env = "ENABLE_CLEANUP",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_cleanup: Option<bool>,

    /// Serve Prometheus metrics
    #[arg(
        long,
        env = "ENABLE_METRICS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_metrics: Option<bool>,

    /// Port for the metrics endpoint
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_feature_flags_mean_true() {
        let args = Args::try_parse_from(["pvesync", "--dry-run", "--enable-cleanup"]).unwrap();
        assert_eq!(args.dry_run, Some(true));
        assert_eq!(args.enable_cleanup, Some(true));
    }

    #[test]
    fn test_explicit_boolean_values_are_accepted() {
        let args = Args::try_parse_from(["pvesync", "--sync-lxc", "no", "--pve-verify-ssl", "1"]).unwrap();
        assert_eq!(args.sync_lxc, Some(false));
        assert_eq!(args.pve_verify_ssl, Some(true));
    }

    #[test]
    fn test_negative_intervals_parse_so_validation_can_report_them() {
        let args = Args::try_parse_from(["pvesync", "--sync-interval", "-5"]).unwrap();
        assert_eq!(args.sync_interval, Some(-5));
    }
}
