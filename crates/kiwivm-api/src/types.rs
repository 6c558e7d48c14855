use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ApiError;

// ── Wire helpers ────────────────────────────────────────────────────

/// Integer that the API sends either as a JSON number or as a numeric string.
///
/// Anything else (`null`, booleans, `""`, garbage) decodes to `0` without
/// failing the surrounding response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FlexInt(pub i64);

impl FlexInt {
    pub fn get(self) -> i64 {
        self.0
    }

    pub fn from_json(value: &Value) -> Self {
        let parsed = match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        };

        match parsed {
            Some(v) => Self(v),
            None => {
                let blank = matches!(value, Value::Null)
                    || matches!(value, Value::String(s) if s.is_empty());
                if !blank {
                    tracing::trace!(%value, "non-numeric value decoded as 0");
                }
                Self(0)
            }
        }
    }
}

impl<'de> Deserialize<'de> for FlexInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

impl From<FlexInt> for i64 {
    fn from(v: FlexInt) -> Self {
        v.0
    }
}

impl From<i64> for FlexInt {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl fmt::Display for FlexInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `deserialize_with` adapter for plain `i64` fields that share the
/// number-or-string quirk.
pub(crate) fn flex_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    FlexInt::deserialize(deserializer).map(FlexInt::get)
}

/// PHP encodes an empty associative array as `[]`, so maps may arrive as an
/// empty list (or `null`).
pub(crate) fn map_or_empty<'de, D, V>(deserializer: D) -> Result<BTreeMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MapOrList<V> {
        Map(BTreeMap<String, V>),
        List(serde::de::IgnoredAny),
    }

    Ok(match Option::<MapOrList<V>>::deserialize(deserializer)? {
        Some(MapOrList::Map(map)) => map,
        Some(MapOrList::List(_)) | None => BTreeMap::new(),
    })
}

// ── Envelope ────────────────────────────────────────────────────────

/// Status fields carried by every API response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    #[serde(default, deserialize_with = "flex_i64")]
    pub error: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "additionalErrorInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_error_info: Option<String>,
    #[serde(
        rename = "additionalLockingInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_locking_info: Option<LockingInfo>,
}

impl ResponseStatus {
    /// `Ok(())` for a zero status, the tagged [`ApiError`] otherwise.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.error == 0 {
            return Ok(());
        }
        Err(ApiError {
            code: self.error,
            message: self.message.unwrap_or_default(),
            operation: self.additional_error_info.filter(|s| !s.is_empty()),
            locking: self.additional_locking_info,
        })
    }
}

/// Progress of the operation currently holding the VPS lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingInfo {
    #[serde(default, deserialize_with = "flex_i64")]
    pub completed_percent: i64,
    #[serde(default)]
    pub friendly_progress_message: String,
    /// Seconds since the provider last updated the progress; `0` when unknown.
    #[serde(rename = "last_status_update_s_ago", default, deserialize_with = "flex_i64")]
    pub last_status_update_secs_ago: i64,
}

// ── Service info ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub vm_type: String,
    pub hostname: String,
    pub plan: String,
    pub os: String,
    pub email: String,

    pub node_alias: String,
    pub node_location_id: String,
    pub node_location: String,
    pub node_datacenter: String,
    pub location_ipv6_ready: bool,

    pub plan_disk: FlexInt,
    pub plan_ram: FlexInt,
    pub plan_swap: FlexInt,

    /// Multiply by `monthly_data_multiplier` for the effective allowance.
    pub plan_monthly_data: FlexInt,
    pub data_counter: FlexInt,
    pub monthly_data_multiplier: FlexInt,
    pub data_next_reset: FlexInt,

    /// IPv4 addresses and IPv6 /64 subnets.
    pub ip_addresses: Vec<String>,
    pub ipv6_sit_tunnel_endpoint: Option<String>,
    pub private_ip_addresses: Vec<String>,
    pub ip_nullroutes: Option<Value>,
    pub plan_max_ipv6s: FlexInt,

    pub iso1: Option<String>,
    pub iso2: Option<String>,
    pub available_isos: Vec<String>,

    pub plan_private_network_available: bool,
    pub location_private_network_available: bool,
    pub rdns_api_available: bool,
    #[serde(deserialize_with = "map_or_empty")]
    pub ptr: BTreeMap<String, Option<String>>,
    pub free_ip_replacement_interval: FlexInt,

    pub suspended: bool,
    pub policy_violation: bool,
    pub suspension_count: FlexInt,
    pub total_abuse_points: FlexInt,
    pub max_abuse_points: FlexInt,
}

/// Service info plus hypervisor-side live status.
///
/// The provider queries the hypervisor for this; expect up to ~15 seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveServiceInfo {
    #[serde(flatten)]
    pub service: ServiceInfo,

    pub is_cpu_throttled: FlexInt,
    pub ssh_port: FlexInt,

    // OpenVZ
    pub vz_status: Option<Value>,
    pub vz_quota: Option<Value>,

    // KVM
    /// `Starting`, `Running` or `Stopped`.
    pub ve_status: Option<String>,
    pub ve_mac1: Option<String>,
    pub ve_used_disk_space_b: FlexInt,
    pub ve_disk_quota_gb: FlexInt,
    pub is_disk_throttled: FlexInt,
    pub live_hostname: Option<String>,
    pub load_average: Option<String>,
    pub mem_available_kb: FlexInt,
    pub swap_total_kb: FlexInt,
    pub swap_available_kb: FlexInt,
    pub screendump_png_base64: Option<String>,
}

// ── OS / usage / audit ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableOs {
    pub installed: String,
    pub templates: Vec<String>,
}

/// One 5-minute aggregation window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageDataPoint {
    #[serde(deserialize_with = "flex_i64")]
    pub timestamp: i64,
    #[serde(deserialize_with = "flex_i64")]
    pub cpu_usage: i64,
    #[serde(deserialize_with = "flex_i64")]
    pub network_in_bytes: i64,
    #[serde(deserialize_with = "flex_i64")]
    pub network_out_bytes: i64,
    #[serde(deserialize_with = "flex_i64")]
    pub disk_read_bytes: i64,
    #[serde(deserialize_with = "flex_i64")]
    pub disk_write_bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub data: Vec<UsageDataPoint>,
    pub vm_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLogEntry {
    pub timestamp: i64,
    pub requestor_ipv4: u32,
    #[serde(rename = "type")]
    pub event_type: i64,
    pub summary: String,
}

impl AuditLogEntry {
    pub fn requestor_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.requestor_ipv4)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AuditLogResponse {
    pub log_entries: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitStatus {
    /// API calls left in the current 15-minute window.
    pub remaining_points_15min: i64,
    pub remaining_points_24h: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ResetRootPasswordResponse {
    pub password: String,
}

// ── Snapshots ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSnapshotResponse {
    #[serde(rename = "notificationEmail")]
    pub notification_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub file_name: String,
    pub os: String,
    pub description: String,
    /// Compressed size in bytes.
    pub size: FlexInt,
    pub md5: String,
    /// Sticky snapshots are never purged.
    pub sticky: bool,
    pub uncompressed: FlexInt,
    /// Seconds until the snapshot is purged.
    pub purges_in: FlexInt,
    pub download_link: Option<String>,
    #[serde(rename = "downloadLinkSSL")]
    pub download_link_ssl: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SnapshotListResponse {
    pub snapshots: Vec<SnapshotInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SnapshotExportResponse {
    pub token: String,
}

// ── Backups ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupInfo {
    /// Not part of the record body on the wire; filled from the map key.
    #[serde(skip_deserializing)]
    pub token: String,
    #[serde(deserialize_with = "flex_i64")]
    pub size: i64,
    pub os: String,
    pub md5: String,
    #[serde(deserialize_with = "flex_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct BackupListResponse {
    #[serde(deserialize_with = "map_or_empty")]
    pub backups: BTreeMap<String, BackupInfo>,
}

// ── Network ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ipv6AddResponse {
    /// Bare subnet address, without the `/64` suffix.
    pub assigned_subnet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AvailablePrivateIpsResponse {
    pub available_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AssignPrivateIpResponse {
    pub assigned_ips: Vec<String>,
}

// ── SSH keys ────────────────────────────────────────────────────────

/// The three key sets known to the provider.
///
/// VM-level keys take precedence over account-level keys; `preferred` is
/// what the next reinstall will actually apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshKeys {
    pub ssh_keys_veid: String,
    pub ssh_keys_user: String,
    pub ssh_keys_preferred: String,
    pub shortened_ssh_keys_veid: String,
    pub shortened_ssh_keys_user: String,
    pub shortened_ssh_keys_preferred: String,
}

impl SshKeys {
    pub fn vm_keys(&self) -> Vec<&str> {
        split_keys(&self.ssh_keys_veid)
    }

    pub fn account_keys(&self) -> Vec<&str> {
        split_keys(&self.ssh_keys_user)
    }

    pub fn preferred_keys(&self) -> Vec<&str> {
        split_keys(&self.ssh_keys_preferred)
    }

    pub fn shortened_vm_keys(&self) -> Vec<&str> {
        split_keys(&self.shortened_ssh_keys_veid)
    }

    pub fn shortened_account_keys(&self) -> Vec<&str> {
        split_keys(&self.shortened_ssh_keys_user)
    }

    pub fn shortened_preferred_keys(&self) -> Vec<&str> {
        split_keys(&self.shortened_ssh_keys_preferred)
    }
}

fn split_keys(raw: &str) -> Vec<&str> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

// ── Migration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrateLocations {
    pub current_location: String,
    pub locations: Vec<String>,
    #[serde(deserialize_with = "map_or_empty")]
    pub descriptions: BTreeMap<String, String>,
    #[serde(deserialize_with = "map_or_empty")]
    pub data_transfer_multipliers: BTreeMap<String, FlexInt>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateStartResponse {
    #[serde(rename = "newIps")]
    pub new_ips: Vec<String>,
    #[serde(rename = "notificationEmail")]
    pub notification_email: String,
}

impl MigrateStartResponse {
    /// New addresses partitioned into `(ipv4, ipv6)`.
    pub fn ip_families(&self) -> (Vec<&str>, Vec<&str>) {
        crate::network::split_ip_families(&self.new_ips)
    }
}
