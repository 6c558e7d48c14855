use chrono::Utc;
use kiwivm_api::{LiveServiceInfo, ServiceInfo};

use super::Context;
use crate::display::{self, format_bytes, format_duration, format_timestamp, usage_line, yes_no};
use crate::error::{CliError, Result};
use crate::query::{self, AuditQuery, GroupBy};

pub async fn info(ctx: &Context, live: bool, compact: bool) -> Result<()> {
    let (client, name) = ctx.client()?;

    if !live {
        let info = client.get_service_info().await?;
        if ctx.json {
            return display::print_json(&info);
        }
        if compact {
            print_compact(&name, &info, None);
        } else {
            print_service(&name, &info);
        }
        return Ok(());
    }

    if !ctx.json {
        eprintln!("Fetching live status for '{name}' (this can take up to 15 seconds)...");
    }
    let info = client.get_live_service_info().await?;
    if ctx.json {
        return display::print_json(&info);
    }
    if compact {
        print_compact(&name, &info.service, info.ve_status.as_deref());
    } else {
        print_service(&name, &info.service);
        print_live(&info);
    }
    Ok(())
}

fn print_compact(name: &str, info: &ServiceInfo, status: Option<&str>) {
    println!(
        "{name}: {} | {} | {} | {} | {} | {} IP(s){}",
        info.hostname,
        info.vm_type,
        info.plan,
        info.os,
        info.node_location,
        info.ip_addresses.len(),
        status.map(|s| format!(" | {s}")).unwrap_or_default()
    );
}

fn print_service(name: &str, info: &ServiceInfo) {
    println!("Instance: {name}");

    println!("\nGeneral");
    println!("  Hostname        : {}", info.hostname);
    println!("  VM type         : {}", info.vm_type);
    println!("  Plan            : {}", info.plan);
    println!("  OS              : {}", info.os);
    println!("  Email           : {}", info.email);
    if info.suspended {
        println!("  Suspended       : yes ({} time(s))", info.suspension_count);
    }

    println!("\nLocation");
    println!("  Node            : {}", info.node_alias);
    println!(
        "  Location        : {} ({})",
        info.node_location, info.node_location_id
    );
    println!("  Datacenter      : {}", info.node_datacenter);
    println!("  IPv6 ready      : {}", yes_no(info.location_ipv6_ready));

    println!("\nResources");
    println!("  RAM             : {}", format_bytes(info.plan_ram.get()));
    println!("  Swap            : {}", format_bytes(info.plan_swap.get()));
    println!("  Disk            : {}", format_bytes(info.plan_disk.get()));

    let multiplier = info.monthly_data_multiplier.get().max(1);
    let allowance = info.plan_monthly_data.get().saturating_mul(multiplier);
    println!("\nData transfer");
    println!("  Used            : {}", usage_line(info.data_counter.get().saturating_mul(multiplier), allowance));
    if multiplier > 1 {
        println!("  Multiplier      : x{multiplier}");
    }
    let reset = info.data_next_reset.get();
    if reset > 0 {
        let remaining = reset - Utc::now().timestamp();
        println!(
            "  Next reset      : {} (in {})",
            format_timestamp(reset),
            format_duration(remaining)
        );
    }

    println!("\nNetwork");
    let (v4, v6) = kiwivm_api::network::split_ip_families(&info.ip_addresses);
    println!("  IPv4            : {}", join_or_none(&v4));
    let v6: Vec<String> = v6
        .iter()
        .map(|s| kiwivm_api::network::ipv6_subnet_cidr(s))
        .collect();
    println!("  IPv6            : {}", join_or_none(&v6));
    if !info.private_ip_addresses.is_empty() {
        println!("  Private         : {}", info.private_ip_addresses.join(", "));
    }
    println!("  Max IPv6 /64s   : {}", info.plan_max_ipv6s);
    println!("  Private network : {}", yes_no(info.plan_private_network_available && info.location_private_network_available));
    println!("  rDNS API        : {}", yes_no(info.rdns_api_available));
    for (ip, ptr) in &info.ptr {
        println!("  PTR {ip:<12}: {}", ptr.as_deref().unwrap_or("-"));
    }

    if info.iso1.is_some() || info.iso2.is_some() {
        println!("\nISO");
        for iso in [&info.iso1, &info.iso2].into_iter().flatten() {
            println!("  Mounted         : {iso}");
        }
    }
}

fn print_live(info: &LiveServiceInfo) {
    println!("\nLive status");
    if let Some(status) = &info.ve_status {
        println!("  Status          : {status}");
    }
    if let Some(host) = info
        .live_hostname
        .as_deref()
        .filter(|h| *h != info.service.hostname)
    {
        println!("  Live hostname   : {host}");
    }
    if info.ssh_port.get() > 0 {
        println!("  SSH port        : {}", info.ssh_port);
    }
    if let Some(load) = &info.load_average {
        println!("  Load average    : {load}");
    }

    let ram = info.service.plan_ram.get();
    let available = info.mem_available_kb.get() * 1024;
    if available > 0 {
        println!("  RAM used        : {}", usage_line(ram - available, ram));
    }
    let used_disk = info.ve_used_disk_space_b.get();
    if used_disk > 0 {
        println!("  Disk used       : {}", usage_line(used_disk, info.service.plan_disk.get()));
    }
    let swap_total = info.swap_total_kb.get() * 1024;
    if swap_total > 0 {
        let swap_used = swap_total - info.swap_available_kb.get() * 1024;
        println!("  Swap used       : {}", usage_line(swap_used, swap_total));
    }
    println!("  CPU throttled   : {}", yes_no(info.is_cpu_throttled.get() == 1));
    if info.service.vm_type == "kvm" {
        println!("  Disk throttled  : {}", yes_no(info.is_disk_throttled.get() == 1));
    }
}

fn join_or_none<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", ")
    }
}

pub async fn rate_limit(ctx: &Context) -> Result<()> {
    let (client, _) = ctx.client()?;
    let status = client.get_rate_limit_status().await?;
    if ctx.json {
        return display::print_json(&status);
    }
    println!("Remaining API calls");
    println!("  15 minutes : {}", status.remaining_points_15min);
    println!("  24 hours   : {}", status.remaining_points_24h);
    Ok(())
}

pub async fn usage(ctx: &Context, days: u32, group_by: &str) -> Result<()> {
    let group_by = match group_by {
        "5m" | "hour" | "day" => GroupBy::parse(Some(group_by)),
        other => {
            return Err(CliError::Usage(format!(
                "invalid --group-by {other:?}: expected 5m, hour or day"
            )));
        }
    };

    let (client, name) = ctx.client()?;
    let stats = client.get_raw_usage_stats().await?;
    let report = query::summarize_usage(&stats.data, Utc::now().timestamp(), days, group_by);
    if ctx.json {
        return display::print_json(&report);
    }

    let Some(summary) = &report.summary else {
        println!("No usage samples for '{name}' in the last {} day(s).", report.days);
        return Ok(());
    };

    println!(
        "Usage for '{name}' ({}, last {} day(s)): {} to {}",
        stats.vm_type, report.days, summary.time_start, summary.time_end
    );
    println!(
        "  CPU      : avg {:.1}%  min {:.0}%  max {:.0}%",
        summary.cpu.avg, summary.cpu.min, summary.cpu.max
    );
    println!(
        "  Network  : in {}  out {}",
        format_bytes(summary.net_in_total_bytes),
        format_bytes(summary.net_out_total_bytes)
    );
    println!(
        "  Disk     : read {}  write {}",
        format_bytes(summary.disk_read_total_bytes),
        format_bytes(summary.disk_write_total_bytes)
    );

    println!(
        "\n{:<22} {:>6} {:>7} {:>10} {:>10} {:>10} {:>10}",
        "BUCKET", "POINTS", "CPU%", "NET IN", "NET OUT", "READ", "WRITE"
    );
    for b in &report.buckets {
        println!(
            "{:<22} {:>6} {:>7.1} {:>10} {:>10} {:>10} {:>10}",
            b.start_rfc3339,
            b.points,
            b.cpu_avg,
            format_bytes(b.net_in_total_bytes),
            format_bytes(b.net_out_total_bytes),
            format_bytes(b.disk_read_total_bytes),
            format_bytes(b.disk_write_total_bytes)
        );
    }
    Ok(())
}

pub async fn audit(
    ctx: &Context,
    limit: Option<usize>,
    since: Option<String>,
    ip: Option<String>,
) -> Result<()> {
    let since = match since.as_deref() {
        Some(raw) => Some(query::parse_rfc3339(raw).ok_or_else(|| {
            CliError::Usage(format!("invalid --since {raw:?}: expected an RFC 3339 time"))
        })?),
        None => None,
    };

    let (client, _) = ctx.client()?;
    let entries = client.get_audit_log().await?;
    let entries = query::filter_audit(
        &entries,
        &AuditQuery {
            since,
            limit,
            ip_contains: ip,
            ..Default::default()
        },
    );

    if ctx.json {
        return display::print_json(&entries);
    }
    if entries.is_empty() {
        println!("No audit log entries.");
        return Ok(());
    }
    for e in &entries {
        println!(
            "{}  {:<15}  [{}] {}",
            format_timestamp(e.timestamp),
            e.requestor_ip(),
            e.event_type,
            e.summary
        );
    }
    Ok(())
}
