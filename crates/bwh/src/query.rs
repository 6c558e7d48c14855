//! Filtering, sorting and aggregation over decoded API entities.
//!
//! Shared by the CLI listings and the MCP tools. Everything here works on
//! owned copies; nothing talks to the network.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use kiwivm_api::{AuditLogEntry, BackupInfo, SnapshotInfo, UsageDataPoint};
use serde::Serialize;

/// Width of one raw usage sample.
const SAMPLE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// `asc` or `desc` in any case; anything else is `default`.
    pub fn parse_or(raw: Option<&str>, default: SortOrder) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") => Self::Asc,
            Some("desc") => Self::Desc,
            _ => default,
        }
    }

    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

/// RFC 3339 to Unix seconds. Unparsable input yields `None` and is treated
/// as "no bound".
pub fn parse_rfc3339(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.timestamp())
}

pub fn to_rfc3339(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// `7d` → 7. Anything else → `None`.
pub fn parse_period_days(raw: &str) -> Option<u32> {
    raw.trim()
        .strip_suffix('d')
        .and_then(|n| n.parse().ok())
        .filter(|&n| n > 0)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn within(ts: i64, since: Option<i64>, until: Option<i64>) -> bool {
    since.is_none_or(|s| ts >= s) && until.is_none_or(|u| ts <= u)
}

fn truncate<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit.filter(|&l| l > 0) {
        items.truncate(limit);
    }
    items
}

// ── Snapshots ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotSort {
    #[default]
    Name,
    Size,
    Sticky,
}

impl SnapshotSort {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("size") => Self::Size,
            Some("sticky") => Self::Sticky,
            _ => Self::Name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub sticky_only: bool,
    /// Case-insensitive match on file name or description.
    pub name_contains: Option<String>,
    pub sort_by: SnapshotSort,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

pub fn filter_snapshots(snapshots: &[SnapshotInfo], query: &SnapshotQuery) -> Vec<SnapshotInfo> {
    let needle = query
        .name_contains
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let mut items: Vec<SnapshotInfo> = snapshots
        .iter()
        .filter(|s| !query.sticky_only || s.sticky)
        .filter(|s| {
            needle.is_none_or(|n| contains_ci(&s.file_name, n) || contains_ci(&s.description, n))
        })
        .cloned()
        .collect();

    items.sort_by(|a, b| {
        let ord = match query.sort_by {
            SnapshotSort::Name => a.file_name.cmp(&b.file_name),
            SnapshotSort::Size => a.size.cmp(&b.size),
            SnapshotSort::Sticky => a.sticky.cmp(&b.sticky),
        };
        query.order.apply(ord)
    });

    truncate(items, query.limit)
}

// ── Backups ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackupSort {
    #[default]
    Time,
    Size,
}

impl BackupSort {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("size") => Self::Size,
            _ => Self::Time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupQuery {
    pub os_contains: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub sort_by: BackupSort,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl Default for BackupQuery {
    /// Newest first.
    fn default() -> Self {
        Self {
            os_contains: None,
            since: None,
            until: None,
            sort_by: BackupSort::Time,
            order: SortOrder::Desc,
            limit: None,
        }
    }
}

pub fn filter_backups<I>(backups: I, query: &BackupQuery) -> Vec<BackupInfo>
where
    I: IntoIterator<Item = BackupInfo>,
{
    let needle = query
        .os_contains
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let mut items: Vec<BackupInfo> = backups
        .into_iter()
        .filter(|b| needle.is_none_or(|n| contains_ci(&b.os, n)))
        .filter(|b| within(b.timestamp, query.since, query.until))
        .collect();

    items.sort_by(|a, b| {
        let ord = match query.sort_by {
            BackupSort::Time => a.timestamp.cmp(&b.timestamp),
            BackupSort::Size => a.size.cmp(&b.size),
        };
        query.order.apply(ord).then_with(|| a.token.cmp(&b.token))
    });

    truncate(items, query.limit)
}

// ── Audit log ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
    /// Substring of the dotted requestor address.
    pub ip_contains: Option<String>,
    pub event_type: Option<i64>,
}

/// Matching entries, newest first.
pub fn filter_audit(entries: &[AuditLogEntry], query: &AuditQuery) -> Vec<AuditLogEntry> {
    let needle = query
        .ip_contains
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let mut items: Vec<AuditLogEntry> = entries
        .iter()
        .filter(|e| within(e.timestamp, query.since, query.until))
        .filter(|e| query.event_type.is_none_or(|t| e.event_type == t))
        .filter(|e| needle.is_none_or(|n| e.requestor_ip().to_string().contains(n)))
        .cloned()
        .collect();

    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    truncate(items, query.limit)
}

// ── Usage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum GroupBy {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "hour")]
    Hour,
    #[default]
    #[serde(rename = "day")]
    Day,
}

impl GroupBy {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("5m") => Self::FiveMinutes,
            Some("hour") => Self::Hour,
            _ => Self::Day,
        }
    }

    pub fn secs(self) -> i64 {
        match self {
            Self::FiveMinutes => SAMPLE_SECS,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CpuStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageBucket {
    pub start_rfc3339: String,
    pub points: usize,
    pub cpu_avg: f64,
    pub cpu_min: f64,
    pub cpu_max: f64,
    pub net_in_total_bytes: i64,
    pub net_out_total_bytes: i64,
    pub disk_read_total_bytes: i64,
    pub disk_write_total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub points: usize,
    pub time_start: String,
    pub time_end: String,
    /// Covered time, counting the last sample's full width.
    pub duration_sec: i64,
    pub cpu: CpuStats,
    pub net_in_total_bytes: i64,
    pub net_out_total_bytes: i64,
    pub disk_read_total_bytes: i64,
    pub disk_write_total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub days: u32,
    pub group_by: GroupBy,
    /// `None` when no sample falls in the window.
    pub summary: Option<UsageSummary>,
    pub buckets: Vec<UsageBucket>,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    cpu_sum: f64,
    cpu_min: f64,
    cpu_max: f64,
    net_in: i64,
    net_out: i64,
    disk_read: i64,
    disk_write: i64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            cpu_sum: 0.0,
            cpu_min: f64::INFINITY,
            cpu_max: f64::NEG_INFINITY,
            net_in: 0,
            net_out: 0,
            disk_read: 0,
            disk_write: 0,
        }
    }
}

impl Accumulator {
    fn add(&mut self, p: &UsageDataPoint) {
        let cpu = p.cpu_usage as f64;
        self.count += 1;
        self.cpu_sum += cpu;
        self.cpu_min = self.cpu_min.min(cpu);
        self.cpu_max = self.cpu_max.max(cpu);
        self.net_in = self.net_in.saturating_add(p.network_in_bytes);
        self.net_out = self.net_out.saturating_add(p.network_out_bytes);
        self.disk_read = self.disk_read.saturating_add(p.disk_read_bytes);
        self.disk_write = self.disk_write.saturating_add(p.disk_write_bytes);
    }

    fn cpu(&self) -> CpuStats {
        CpuStats {
            avg: self.cpu_sum / self.count.max(1) as f64,
            min: self.cpu_min,
            max: self.cpu_max,
        }
    }
}

/// Aggregate the samples from the last `days` days (relative to `now`) into
/// `group_by` buckets plus a window-wide summary.
pub fn summarize_usage(
    points: &[UsageDataPoint],
    now: i64,
    days: u32,
    group_by: GroupBy,
) -> UsageReport {
    let days = days.max(1);
    let cutoff = now - i64::from(days) * 86_400;
    let width = group_by.secs();

    let mut buckets: BTreeMap<i64, Accumulator> = BTreeMap::new();
    let mut total = Accumulator::default();
    let (mut first, mut last) = (i64::MAX, i64::MIN);

    for p in points.iter().filter(|p| p.timestamp >= cutoff) {
        first = first.min(p.timestamp);
        last = last.max(p.timestamp);
        total.add(p);
        let start = p.timestamp - p.timestamp.rem_euclid(width);
        buckets.entry(start).or_default().add(p);
    }

    let summary = (total.count > 0).then(|| UsageSummary {
        points: total.count,
        time_start: to_rfc3339(first),
        time_end: to_rfc3339(last),
        duration_sec: (last - first).max(0) + SAMPLE_SECS,
        cpu: total.cpu(),
        net_in_total_bytes: total.net_in,
        net_out_total_bytes: total.net_out,
        disk_read_total_bytes: total.disk_read,
        disk_write_total_bytes: total.disk_write,
    });

    let buckets = buckets
        .into_iter()
        .map(|(start, acc)| {
            let cpu = acc.cpu();
            UsageBucket {
                start_rfc3339: to_rfc3339(start),
                points: acc.count,
                cpu_avg: cpu.avg,
                cpu_min: cpu.min,
                cpu_max: cpu.max,
                net_in_total_bytes: acc.net_in,
                net_out_total_bytes: acc.net_out,
                disk_read_total_bytes: acc.disk_read,
                disk_write_total_bytes: acc.disk_write,
            }
        })
        .collect();

    UsageReport {
        days,
        group_by,
        summary,
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use kiwivm_api::FlexInt;

    use super::*;

    fn snap(name: &str, size: i64, sticky: bool, description: &str) -> SnapshotInfo {
        SnapshotInfo {
            file_name: name.into(),
            size: FlexInt(size),
            sticky,
            description: description.into(),
            ..Default::default()
        }
    }

    fn names(items: &[SnapshotInfo]) -> Vec<&str> {
        items.iter().map(|s| s.file_name.as_str()).collect()
    }

    #[test]
    fn snapshots_filter_and_sort() {
        let snaps = vec![
            snap("b.tar.gz", 300, false, "nightly"),
            snap("a.tar.gz", 100, true, "Before upgrade"),
            snap("c.tar.gz", 200, true, ""),
        ];

        let all = filter_snapshots(&snaps, &SnapshotQuery::default());
        assert_eq!(names(&all), vec!["a.tar.gz", "b.tar.gz", "c.tar.gz"]);

        let sticky = filter_snapshots(
            &snaps,
            &SnapshotQuery {
                sticky_only: true,
                sort_by: SnapshotSort::Size,
                order: SortOrder::Desc,
                ..Default::default()
            },
        );
        assert_eq!(names(&sticky), vec!["c.tar.gz", "a.tar.gz"]);

        let by_description = filter_snapshots(
            &snaps,
            &SnapshotQuery {
                name_contains: Some("UPGRADE".into()),
                ..Default::default()
            },
        );
        assert_eq!(names(&by_description), vec!["a.tar.gz"]);

        let sticky_first = filter_snapshots(
            &snaps,
            &SnapshotQuery {
                sort_by: SnapshotSort::Sticky,
                order: SortOrder::Desc,
                limit: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(sticky_first.len(), 2);
        assert!(sticky_first.iter().all(|s| s.sticky));
    }

    fn backup(token: &str, os: &str, size: i64, timestamp: i64) -> BackupInfo {
        BackupInfo {
            token: token.into(),
            os: os.into(),
            size,
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn backups_default_newest_first_with_time_window() {
        let backups = vec![
            backup("t1", "debian-12-x86_64", 10, 1_700_000_000),
            backup("t2", "ubuntu-22.04-x86_64", 30, 1_700_100_000),
            backup("t3", "debian-11-x86_64", 20, 1_700_200_000),
        ];

        let newest = filter_backups(backups.clone(), &BackupQuery::default());
        let tokens: Vec<_> = newest.iter().map(|b| b.token.as_str()).collect();
        assert_eq!(tokens, vec!["t3", "t2", "t1"]);

        let query = BackupQuery {
            os_contains: Some("Debian".into()),
            since: parse_rfc3339("2023-11-14T22:13:20Z"),
            until: None,
            sort_by: BackupSort::Size,
            order: SortOrder::Asc,
            limit: None,
        };
        let tokens: Vec<_> = filter_backups(backups, &query)
            .into_iter()
            .map(|b| b.token)
            .collect();
        assert_eq!(tokens, vec!["t1", "t3"]);
    }

    #[test]
    fn audit_newest_first_with_ip_and_type() {
        let entry = |ts, ip: u32, kind| AuditLogEntry {
            timestamp: ts,
            requestor_ipv4: ip,
            event_type: kind,
            summary: String::new(),
        };
        let entries = vec![
            entry(100, 0xC0A8_0001, 1), // 192.168.0.1
            entry(300, 0x0A00_0005, 1), // 10.0.0.5
            entry(200, 0xC0A8_0002, 2), // 192.168.0.2
        ];

        let all = filter_audit(&entries, &AuditQuery::default());
        let stamps: Vec<_> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);

        let lan = filter_audit(
            &entries,
            &AuditQuery {
                ip_contains: Some("192.168".into()),
                limit: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(lan.len(), 1);
        assert_eq!(lan[0].timestamp, 200);

        let typed = filter_audit(
            &entries,
            &AuditQuery {
                event_type: Some(1),
                until: Some(150),
                ..Default::default()
            },
        );
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].timestamp, 100);
    }

    fn sample(timestamp: i64, cpu: i64, net_in: i64) -> UsageDataPoint {
        UsageDataPoint {
            timestamp,
            cpu_usage: cpu,
            network_in_bytes: net_in,
            ..Default::default()
        }
    }

    #[test]
    fn usage_buckets_by_hour() {
        let now = 1_700_000_000 - 1_700_000_000 % 3_600 + 7_200;
        let base = now - 7_200;
        let points = vec![
            sample(base - 10 * 86_400, 99, 1), // outside the window
            sample(base, 10, 100),
            sample(base + 300, 30, 200),
            sample(base + 3_600, 50, 400),
        ];

        let report = summarize_usage(&points, now, 1, GroupBy::Hour);
        assert_eq!(report.buckets.len(), 2);
        assert_eq!(report.buckets[0].points, 2);
        assert_eq!(report.buckets[0].cpu_avg, 20.0);
        assert_eq!(report.buckets[0].cpu_min, 10.0);
        assert_eq!(report.buckets[0].cpu_max, 30.0);
        assert_eq!(report.buckets[0].net_in_total_bytes, 300);
        assert_eq!(report.buckets[0].start_rfc3339, to_rfc3339(base));

        let summary = report.summary.unwrap();
        assert_eq!(summary.points, 3);
        assert_eq!(summary.cpu.max, 50.0);
        assert_eq!(summary.net_in_total_bytes, 700);
        assert_eq!(summary.duration_sec, 3_600 + 300);
    }

    #[test]
    fn usage_without_samples_has_no_summary() {
        let report = summarize_usage(&[], 1_700_000_000, 0, GroupBy::parse(Some("week")));
        assert_eq!(report.days, 1);
        assert_eq!(report.group_by, GroupBy::Day);
        assert!(report.summary.is_none());
        assert!(report.buckets.is_empty());
    }

    #[test]
    fn periods_and_timestamps_parse() {
        assert_eq!(parse_period_days("7d"), Some(7));
        assert_eq!(parse_period_days("0d"), None);
        assert_eq!(parse_period_days("7h"), None);
        assert_eq!(parse_rfc3339("2024-01-01T00:00:00Z"), Some(1_704_067_200));
        assert_eq!(parse_rfc3339("2024-01-01T08:00:00+08:00"), Some(1_704_067_200));
        assert_eq!(parse_rfc3339("yesterday"), None);
        assert_eq!(to_rfc3339(1_704_067_200), "2024-01-01T00:00:00Z");
        assert_eq!(SortOrder::parse_or(Some("DESC"), SortOrder::Asc), SortOrder::Desc);
        assert_eq!(SortOrder::parse_or(Some("sideways"), SortOrder::Desc), SortOrder::Desc);
    }
}
