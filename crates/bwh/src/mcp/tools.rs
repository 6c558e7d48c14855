//! Tool catalogue, argument decoding and execution.

use chrono::Utc;
use kiwivm_api::{KiwiClient, ServiceInfo};
use serde_json::{Map, Value, json};

use crate::query::{
    self, AuditQuery, BackupQuery, BackupSort, GroupBy, SnapshotQuery, SnapshotSort, SortOrder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    VpsInfo,
    VpsUsage,
    SnapshotList,
    BackupList,
    VpsAudit,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::VpsInfo,
        Tool::VpsUsage,
        Tool::SnapshotList,
        Tool::BackupList,
        Tool::VpsAudit,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::VpsInfo => "vps_info_get",
            Self::VpsUsage => "vps_usage_get",
            Self::SnapshotList => "snapshot_list",
            Self::BackupList => "backup_list",
            Self::VpsAudit => "vps_audit_get",
        }
    }

    /// Used in failure messages: "<action> failed: ...".
    pub fn action(self) -> &'static str {
        match self {
            Self::VpsInfo => "get info",
            Self::VpsUsage => "get usage",
            Self::SnapshotList => "list snapshots",
            Self::BackupList => "list backups",
            Self::VpsAudit => "get audit log",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::VpsInfo => "Get VPS information for a BandwagonHost (KiwiVM) instance",
            Self::VpsUsage => {
                "Get CPU, network and disk usage for a BandwagonHost (KiwiVM) instance, \
                 bucketed by 5m, hour or day"
            }
            Self::SnapshotList => "List snapshots of a BandwagonHost (KiwiVM) instance",
            Self::BackupList => "List backups of a BandwagonHost (KiwiVM) instance",
            Self::VpsAudit => "Get audit log entries of a BandwagonHost (KiwiVM) instance",
        }
    }

    fn properties(self) -> Value {
        let instance = json!({
            "type": "string",
            "description": "Target instance name; defaults to the configured default",
        });
        let limit = json!({ "type": "number", "description": "Maximum items to return" });
        let since = json!({ "type": "string", "description": "RFC 3339 inclusive start" });
        let until = json!({ "type": "string", "description": "RFC 3339 inclusive end" });

        match self {
            Self::VpsInfo => json!({
                "instance": instance,
                "compact": {
                    "type": "boolean",
                    "default": false,
                    "description": "Return a short summary instead of the full payload",
                },
                "live": {
                    "type": "boolean",
                    "default": true,
                    "description": "Include live hypervisor status (slower)",
                },
            }),
            Self::VpsUsage => json!({
                "instance": instance,
                "period": { "type": "string", "description": "Lookback window, e.g. 1d, 7d, 30d" },
                "days": { "type": "number", "description": "Lookback days; wins over period" },
                "group_by": {
                    "type": "string",
                    "enum": ["5m", "hour", "day"],
                    "description": "Bucket size (default: day)",
                },
            }),
            Self::SnapshotList => json!({
                "instance": instance,
                "sticky_only": { "type": "boolean", "default": false, "description": "Only sticky snapshots" },
                "name_contains": { "type": "string", "description": "Substring of file name or description" },
                "sort_by": { "type": "string", "enum": ["name", "size", "sticky"], "description": "Sort key (default: name)" },
                "order": { "type": "string", "enum": ["asc", "desc"], "description": "Sort order (default: asc)" },
                "limit": limit,
            }),
            Self::BackupList => json!({
                "instance": instance,
                "os_contains": { "type": "string", "description": "Substring of the OS name" },
                "since": since,
                "until": until,
                "sort_by": { "type": "string", "enum": ["time", "size"], "description": "Sort key (default: time)" },
                "order": { "type": "string", "enum": ["asc", "desc"], "description": "Sort order (default: desc)" },
                "limit": limit,
            }),
            Self::VpsAudit => json!({
                "instance": instance,
                "since": since,
                "until": until,
                "limit": { "type": "number", "description": "Maximum entries to return, newest first" },
                "ip_contains": { "type": "string", "description": "Substring of the requestor IPv4 address" },
                "type": { "type": "number", "description": "Event type" },
            }),
        }
    }

    pub fn definition(self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": {
                "type": "object",
                "properties": self.properties(),
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": true,
            },
        })
    }
}

// ── Arguments ───────────────────────────────────────────────────────

/// Lenient view over `tools/call` arguments. Missing or mistyped values
/// fall back to the tool's defaults.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Args<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self {
            map: value.as_object(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(key))
    }

    /// Trimmed, non-empty string.
    pub fn string(&self, key: &str) -> Option<&'a str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim() {
                "true" => true,
                "false" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Integers, integral floats and numeric strings.
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn limit(&self) -> Option<usize> {
        self.int("limit")
            .filter(|n| *n > 0)
            .and_then(|n| usize::try_from(n).ok())
    }

    fn time(&self, key: &str) -> Option<i64> {
        self.string(key).and_then(query::parse_rfc3339)
    }
}

pub fn usage_window(args: &Args<'_>) -> (u32, GroupBy) {
    let days = args
        .int("days")
        .filter(|d| *d > 0)
        .and_then(|d| u32::try_from(d).ok())
        .or_else(|| args.string("period").and_then(query::parse_period_days))
        .unwrap_or(1);
    (days, GroupBy::parse(args.string("group_by")))
}

pub fn snapshot_query(args: &Args<'_>) -> SnapshotQuery {
    SnapshotQuery {
        sticky_only: args.bool("sticky_only", false),
        name_contains: args.string("name_contains").map(str::to_string),
        sort_by: SnapshotSort::parse(args.string("sort_by")),
        order: SortOrder::parse_or(args.string("order"), SortOrder::Asc),
        limit: args.limit(),
    }
}

pub fn backup_query(args: &Args<'_>) -> BackupQuery {
    BackupQuery {
        os_contains: args.string("os_contains").map(str::to_string),
        since: args.time("since"),
        until: args.time("until"),
        sort_by: BackupSort::parse(args.string("sort_by")),
        order: SortOrder::parse_or(args.string("order"), SortOrder::Desc),
        limit: args.limit(),
    }
}

pub fn audit_query(args: &Args<'_>) -> AuditQuery {
    AuditQuery {
        since: args.time("since"),
        until: args.time("until"),
        limit: args.limit(),
        ip_contains: args.string("ip_contains").map(str::to_string),
        event_type: args.int("type").filter(|t| *t >= 0),
    }
}

// ── Execution ───────────────────────────────────────────────────────

/// Run `tool` against `client`. The payload always carries the resolved
/// instance name.
pub async fn execute(
    tool: Tool,
    client: &KiwiClient,
    instance: &str,
    args: &Args<'_>,
) -> kiwivm_api::Result<Value> {
    match tool {
        Tool::VpsInfo => {
            let compact = args.bool("compact", false);
            if args.bool("live", true) {
                let info = client.get_live_service_info().await?;
                if compact {
                    let mut summary = compact_summary(&info.service);
                    summary["status"] = json!(info.ve_status);
                    return Ok(json!({ "instance": instance, "summary": summary }));
                }
                return Ok(json!({ "instance": instance, "data": info }));
            }

            let info = client.get_service_info().await?;
            if compact {
                return Ok(json!({ "instance": instance, "summary": compact_summary(&info) }));
            }
            Ok(json!({ "instance": instance, "data": info }))
        }

        Tool::VpsUsage => {
            let (days, group_by) = usage_window(args);
            let stats = client.get_raw_usage_stats().await?;
            let report = query::summarize_usage(&stats.data, Utc::now().timestamp(), days, group_by);
            Ok(json!({
                "instance": instance,
                "range": { "days": report.days, "group_by": report.group_by },
                "summary": report.summary,
                "buckets": report.buckets,
            }))
        }

        Tool::SnapshotList => {
            let snapshots = client.list_snapshots().await?;
            let items = query::filter_snapshots(&snapshots, &snapshot_query(args));
            Ok(json!({ "instance": instance, "items": items }))
        }

        Tool::BackupList => {
            let backups = client.list_backups().await?;
            let items = query::filter_backups(backups.into_values(), &backup_query(args));
            Ok(json!({ "instance": instance, "items": items }))
        }

        Tool::VpsAudit => {
            let entries = client.get_audit_log().await?;
            let items = query::filter_audit(&entries, &audit_query(args));
            Ok(json!({ "instance": instance, "items": items }))
        }
    }
}

fn compact_summary(info: &ServiceInfo) -> Value {
    json!({
        "hostname": info.hostname,
        "vm_type": info.vm_type,
        "plan": info.plan,
        "os": info.os,
        "location": info.node_location,
        "ips": info.ip_addresses.len(),
    })
}
