//! Typed Rust client for the KiwiVM (BandwagonHost) VPS control API.
//!
//! Covers service info, power control, snapshots, backups, network
//! (PTR, IPv6 subnets, private IPv4), SSH keys, OS reinstall, ISO mounts,
//! usage/audit data, and migration, including the wait-until-unlocked
//! protocol in [`migrate`].
//!
//! Every call is a GET against `<base>/<operation>` authenticated with the
//! `veid` and `api_key` query parameters. The provider answers HTTP 200 for
//! domain errors and puts the status in the JSON body; a nonzero status
//! becomes [`Error::Api`].

mod error;
pub mod migrate;
pub mod network;
mod types;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::debug;

pub use error::*;
pub use migrate::{MigrationBackend, MigrationEvent, MigrationOptions, MigrationOutcome};
pub use types::*;

pub const DEFAULT_BASE_URL: &str = "https://api.64clouds.com/v1";

/// Timeout for ordinary calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `getLiveServiceInfo` queries the hypervisor and can take ~15 seconds.
pub const LIVE_INFO_TIMEOUT: Duration = Duration::from_secs(60);

/// `migrate/start` may hold the connection for the whole migration.
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const CLIENT_USER_AGENT: &str = concat!("bwh/", env!("CARGO_PKG_VERSION"));

/// Client bound to one VPS (API key + VEID).
#[derive(Clone)]
pub struct KiwiClient {
    api_key: String,
    veid: u64,
    base_url: String,
    http: reqwest::Client,
}

impl fmt::Debug for KiwiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KiwiClient")
            .field("veid", &self.veid)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl KiwiClient {
    pub fn new(api_key: impl Into<String>, veid: u64) -> Self {
        Self {
            api_key: api_key.into(),
            veid,
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at a custom endpoint (self-hosted proxy, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.set_base_url(base_url);
        self
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
    }

    /// Use a preconfigured transport (proxy, TLS settings). Per-call timeouts
    /// still apply on top of it.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn veid(&self) -> u64 {
        self.veid
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    // ── Request executor ────────────────────────────────────────────

    /// Send one API call and decode its result.
    ///
    /// Caller parameters named `veid` or `api_key` are dropped; identity
    /// always comes from the client.
    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T> {
        let raw_url = self.url(endpoint);
        let url = reqwest::Url::parse(&raw_url).map_err(|_| Error::Url { url: raw_url })?;

        let veid = self.veid.to_string();
        let query = build_query(endpoint, params, &veid, &self.api_key);

        debug!(endpoint, veid = self.veid, ?timeout, "kiwivm request");

        let resp = self
            .http
            .get(url)
            .query(&query)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| Error::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(Error::Status {
                endpoint: endpoint.to_string(),
                status,
            });
        }

        let body = resp.bytes().await.map_err(|source| Error::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        decode(endpoint, &body)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        self.execute(endpoint, params, DEFAULT_TIMEOUT).await
    }

    /// For operations whose only result is the status.
    async fn call_unit(&self, endpoint: &'static str, params: &[(&str, &str)]) -> Result<()> {
        self.call::<IgnoredAny>(endpoint, params).await.map(|_| ())
    }

    // ── Info ────────────────────────────────────────────────────────

    pub async fn get_service_info(&self) -> Result<ServiceInfo> {
        self.call("getServiceInfo", &[]).await
    }

    /// Service info plus live hypervisor status.
    ///
    /// Slow by design (up to ~15 seconds); runs under [`LIVE_INFO_TIMEOUT`]
    /// rather than the default.
    pub async fn get_live_service_info(&self) -> Result<LiveServiceInfo> {
        self.execute("getLiveServiceInfo", &[], LIVE_INFO_TIMEOUT)
            .await
    }

    pub async fn get_rate_limit_status(&self) -> Result<RateLimitStatus> {
        self.call("getRateLimitStatus", &[]).await
    }

    pub async fn get_raw_usage_stats(&self) -> Result<UsageStats> {
        self.call("getRawUsageStats", &[]).await
    }

    pub async fn get_audit_log(&self) -> Result<Vec<AuditLogEntry>> {
        let resp: AuditLogResponse = self.call("getAuditLog", &[]).await?;
        Ok(resp.log_entries)
    }

    // ── Power ───────────────────────────────────────────────────────

    pub async fn start(&self) -> Result<()> {
        self.call_unit("start", &[]).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.call_unit("stop", &[]).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.call_unit("restart", &[]).await
    }

    /// Force-stop a VPS that is stuck. Unsaved data is lost.
    pub async fn kill(&self) -> Result<()> {
        self.call_unit("kill", &[]).await
    }

    // ── Host settings ───────────────────────────────────────────────

    pub async fn set_hostname(&self, hostname: &str) -> Result<()> {
        validate::not_empty(hostname, "hostname")?;
        self.call_unit("setHostname", &[("newHostname", hostname)])
            .await
    }

    /// Returns the new root password.
    pub async fn reset_root_password(&self) -> Result<String> {
        let resp: ResetRootPasswordResponse = self.call("resetRootPassword", &[]).await?;
        Ok(resp.password)
    }

    /// Boot from an ISO image. Takes effect after a full stop/start.
    pub async fn mount_iso(&self, iso: &str) -> Result<()> {
        validate::not_empty(iso, "ISO image")?;
        self.call_unit("iso/mount", &[("iso", iso)]).await
    }

    pub async fn unmount_iso(&self) -> Result<()> {
        self.call_unit("iso/unmount", &[]).await
    }

    // ── OS reinstall ────────────────────────────────────────────────

    pub async fn get_available_os(&self) -> Result<AvailableOs> {
        self.call("getAvailableOS", &[]).await
    }

    /// Reinstall the OS, destroying all data on the VPS.
    ///
    /// The template is checked against `getAvailableOS` first, so an unknown
    /// template never reaches the mutating call.
    pub async fn reinstall_os(&self, template: &str) -> Result<()> {
        validate::not_empty(template, "OS template")?;
        let available = self.get_available_os().await?;
        self.reinstall_os_checked(template, &available).await
    }

    /// [`reinstall_os`](Self::reinstall_os) against a template list the
    /// caller already fetched, saving one `getAvailableOS` call.
    pub async fn reinstall_os_checked(&self, template: &str, available: &AvailableOs) -> Result<()> {
        validate::not_empty(template, "OS template")?;
        validate::os_template(template, &available.templates)?;
        self.call_unit("reinstallOS", &[("os", template)]).await
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub async fn create_snapshot(&self, description: Option<&str>) -> Result<CreateSnapshotResponse> {
        let mut params = Vec::new();
        if let Some(desc) = description.filter(|d| !d.is_empty()) {
            params.push(("description", desc));
        }
        self.call("snapshot/create", &params).await
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let resp: SnapshotListResponse = self.call("snapshot/list", &[]).await?;
        Ok(resp.snapshots)
    }

    pub async fn delete_snapshot(&self, file_name: &str) -> Result<()> {
        validate::not_empty(file_name, "snapshot file name")?;
        self.call_unit("snapshot/delete", &[("snapshot", file_name)])
            .await
    }

    /// Overwrites everything on the VPS with the snapshot contents.
    pub async fn restore_snapshot(&self, file_name: &str) -> Result<()> {
        validate::not_empty(file_name, "snapshot file name")?;
        self.call_unit("snapshot/restore", &[("snapshot", file_name)])
            .await
    }

    /// Sticky snapshots are exempt from automatic purging.
    pub async fn toggle_snapshot_sticky(&self, file_name: &str, sticky: bool) -> Result<()> {
        validate::not_empty(file_name, "snapshot file name")?;
        let flag = if sticky { "1" } else { "0" };
        self.call_unit(
            "snapshot/toggleSticky",
            &[("snapshot", file_name), ("sticky", flag)],
        )
        .await
    }

    /// Returns a transfer token that another VPS can pass to
    /// [`import_snapshot`](Self::import_snapshot).
    pub async fn export_snapshot(&self, file_name: &str) -> Result<String> {
        validate::not_empty(file_name, "snapshot file name")?;
        let resp: SnapshotExportResponse = self
            .call("snapshot/export", &[("snapshot", file_name)])
            .await?;
        Ok(resp.token)
    }

    pub async fn import_snapshot(&self, source_veid: u64, source_token: &str) -> Result<()> {
        validate::not_empty(source_token, "source token")?;
        let source_veid = source_veid.to_string();
        self.call_unit(
            "snapshot/import",
            &[("sourceVeid", &source_veid), ("sourceToken", source_token)],
        )
        .await
    }

    // ── Backups ─────────────────────────────────────────────────────

    /// Backups keyed by token, with the token copied into each record.
    pub async fn list_backups(&self) -> Result<BTreeMap<String, BackupInfo>> {
        let resp: BackupListResponse = self.call("backup/list", &[]).await?;
        Ok(resp
            .backups
            .into_iter()
            .map(|(token, mut info)| {
                info.token = token.clone();
                (token, info)
            })
            .collect())
    }

    /// Copy a backup into a restorable snapshot.
    pub async fn copy_backup_to_snapshot(&self, backup_token: &str) -> Result<()> {
        validate::backup_token(backup_token)?;
        self.call_unit("backup/copyToSnapshot", &[("backupToken", backup_token)])
            .await
    }

    // ── Network ─────────────────────────────────────────────────────

    /// Set the rDNS record for one of the VPS addresses.
    pub async fn set_ptr(&self, ip: IpAddr, ptr: &str) -> Result<()> {
        validate::not_empty(ptr, "PTR record")?;
        let ip = ip.to_string();
        self.call_unit("setPTR", &[("ip", &ip), ("ptr", ptr)]).await
    }

    /// Assign a new IPv6 /64 subnet.
    pub async fn add_ipv6(&self) -> Result<Ipv6AddResponse> {
        self.call("ipv6/add", &[]).await
    }

    /// Release an IPv6 /64 subnet; `subnet` may carry the `/64` suffix.
    pub async fn delete_ipv6(&self, subnet: &str) -> Result<()> {
        let subnet = network::normalize_ipv6_subnet(subnet)?;
        self.call_unit("ipv6/delete", &[("ip", &subnet)]).await
    }

    pub async fn get_available_private_ips(&self) -> Result<Vec<String>> {
        let resp: AvailablePrivateIpsResponse = self.call("privateIp/getAvailableIps", &[]).await?;
        Ok(resp.available_ips)
    }

    /// Assign a private IPv4 address; the provider picks one when `ip` is
    /// `None`. Returns the addresses now assigned.
    pub async fn assign_private_ip(&self, ip: Option<Ipv4Addr>) -> Result<Vec<String>> {
        let ip = ip.map(|ip| ip.to_string());
        let mut params = Vec::new();
        if let Some(ip) = ip.as_deref() {
            params.push(("ip", ip));
        }
        let resp: AssignPrivateIpResponse = self.call("privateIp/assign", &params).await?;
        Ok(resp.assigned_ips)
    }

    pub async fn delete_private_ip(&self, ip: Ipv4Addr) -> Result<()> {
        let ip = ip.to_string();
        self.call_unit("privateIp/delete", &[("ip", &ip)]).await
    }

    // ── SSH keys ────────────────────────────────────────────────────

    pub async fn get_ssh_keys(&self) -> Result<SshKeys> {
        self.call("getSshKeys", &[]).await
    }

    /// Replace (not merge) the VM-level keys. An empty slice clears them.
    /// Keys apply on the next OS reinstall.
    pub async fn update_ssh_keys<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        validate::ssh_keys(keys)?;
        let joined = if keys.is_empty() {
            String::new()
        } else {
            let mut joined = keys
                .iter()
                .map(|k| k.as_ref().trim())
                .collect::<Vec<_>>()
                .join("\n");
            joined.push('\n');
            joined
        };
        self.call_unit("updateSshKeys", &[("ssh_keys", &joined)])
            .await
    }

    // ── Migration ───────────────────────────────────────────────────

    pub async fn get_migrate_locations(&self) -> Result<MigrateLocations> {
        self.call("migrate/getLocations", &[]).await
    }

    /// Ask the provider to migrate the VPS. Replaces all IPv4 addresses.
    ///
    /// Returns once the provider accepts (or the call times out); acceptance
    /// is not completion. Use [`migrate::wait_for_migration`] to follow the
    /// migration until the VPS unlocks.
    pub async fn start_migration(
        &self,
        location: &str,
        timeout: Duration,
    ) -> Result<MigrateStartResponse> {
        validate::not_empty(location, "location")?;
        self.execute("migrate/start", &[("location", location)], timeout)
            .await
    }
}

/// Operation parameters followed by the identity pair. Caller entries named
/// `veid` or `api_key` are dropped.
fn build_query<'a>(
    endpoint: &str,
    params: &[(&'a str, &'a str)],
    veid: &'a str,
    api_key: &'a str,
) -> Vec<(&'a str, &'a str)> {
    let mut query = Vec::with_capacity(params.len() + 2);
    for &(key, value) in params {
        if key == "veid" || key == "api_key" {
            debug!(endpoint, key, "dropping caller parameter that shadows identity");
            continue;
        }
        query.push((key, value));
    }
    query.push(("veid", veid));
    query.push(("api_key", api_key));
    query
}

/// Decode the envelope first; domain fields are only read for a zero status.
fn decode<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<T> {
    let decode_err = |source| Error::Decode {
        endpoint: endpoint.to_string(),
        source,
    };

    let status: ResponseStatus = serde_json::from_slice(body).map_err(decode_err)?;
    if let Err(e) = status.into_result() {
        debug!(endpoint, code = e.code, message = %e.message, "kiwivm api error");
        return Err(e.into());
    }

    serde_json::from_slice(body).map_err(decode_err)
}
