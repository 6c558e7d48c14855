//! Human-readable formatting for terminal output.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// 1024-based, one decimal above bytes: `512 B`, `1.5 KB`, `2.0 GB`.
pub fn format_bytes(bytes: i64) -> String {
    const UNIT: i64 = 1024;
    const SUFFIXES: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

    if bytes.abs() < UNIT {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / UNIT as f64;
    let mut idx = 0;
    while value.abs() >= UNIT as f64 && idx < SUFFIXES.len() - 1 {
        value /= UNIT as f64;
        idx += 1;
    }
    format!("{value:.1} {}", SUFFIXES[idx])
}

/// Two most significant units: `1d 2h`, `3h 5m`, `7m`, `42s`.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (days, hours, minutes) = (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60);

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Unix seconds as `2024-01-31 12:00:00 UTC`; `-` when out of range or zero.
pub fn format_timestamp(secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(ts) if secs > 0 => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => "-".to_string(),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print addresses grouped by family, skipping empty groups.
pub fn print_ip_families(title: &str, ips: &[String]) {
    if ips.is_empty() {
        return;
    }
    let (v4, v6) = kiwivm_api::network::split_ip_families(ips);
    println!("{title}:");
    for (family, list) in [("IPv4", v4), ("IPv6", v6)] {
        if list.is_empty() {
            continue;
        }
        println!("  {family}:");
        for ip in list {
            println!("    - {ip}");
        }
    }
}

/// `used / total (pct%)`, or just the total when usage is unknown.
pub fn usage_line(used: i64, total: i64) -> String {
    if total <= 0 {
        return format_bytes(used);
    }
    if used <= 0 {
        return format!("{} total", format_bytes(total));
    }
    let pct = used as f64 / total as f64 * 100.0;
    format!("{} / {} ({pct:.1}%)", format_bytes(used), format_bytes(total))
}
