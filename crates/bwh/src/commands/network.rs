use std::net::IpAddr;

use kiwivm_api::{network, validate};

use super::{Context, confirm};
use crate::cli::{Ipv6Command, PrivateIpCommand};
use crate::display;
use crate::error::Result;

pub async fn ipv6(ctx: &Context, cmd: Ipv6Command) -> Result<()> {
    match cmd {
        Ipv6Command::List => {
            let (client, name) = ctx.client()?;
            let info = client.get_service_info().await?;
            let (_, v6) = network::split_ip_families(&info.ip_addresses);
            let subnets: Vec<String> = v6.iter().map(|s| network::ipv6_subnet_cidr(s)).collect();
            if ctx.json {
                return display::print_json(&subnets);
            }
            if subnets.is_empty() {
                println!("No IPv6 subnets assigned to '{name}'.");
                return Ok(());
            }
            for s in &subnets {
                println!("{s}");
            }
            Ok(())
        }

        Ipv6Command::Add(c) => {
            let (client, name) = ctx.client()?;
            if !confirm(c, &format!("Assign a new IPv6 /64 subnet to '{name}'?"))? {
                return Ok(());
            }
            let resp = client.add_ipv6().await?;
            if ctx.json {
                return display::print_json(&resp);
            }
            println!("Assigned {}", network::ipv6_subnet_cidr(&resp.assigned_subnet));
            Ok(())
        }

        Ipv6Command::Delete { subnet, confirm: c } => {
            let subnet = network::normalize_ipv6_subnet(&subnet)?;
            let (client, name) = ctx.client()?;
            let cidr = network::ipv6_subnet_cidr(&subnet);
            if !confirm(c, &format!("Release {cidr} from '{name}'?"))? {
                return Ok(());
            }
            client.delete_ipv6(&subnet).await?;
            println!("Released {cidr}");
            Ok(())
        }
    }
}

pub async fn private_ip(ctx: &Context, cmd: PrivateIpCommand) -> Result<()> {
    match cmd {
        PrivateIpCommand::Available { all } => {
            let (client, _) = ctx.client()?;
            let ips = client.get_available_private_ips().await?;
            if ctx.json {
                return display::print_json(&ips);
            }
            if ips.is_empty() {
                println!("No private addresses available.");
                return Ok(());
            }
            if all {
                for ip in &ips {
                    println!("{ip}");
                }
                return Ok(());
            }

            let (ranges, total) = network::aggregate_ipv4_ranges(&ips);
            println!("{total} address(es) available in {} range(s):", ranges.len());
            for r in &ranges {
                println!("  {r} ({})", r.count());
            }
            Ok(())
        }

        PrivateIpCommand::Assign { ip, confirm: c } => {
            let ip = ip.as_deref().map(validate::ipv4).transpose()?;
            let (client, name) = ctx.client()?;
            let prompt = match ip {
                Some(ip) => format!("Assign private address {ip} to '{name}'?"),
                None => format!("Assign a private address to '{name}'?"),
            };
            if !confirm(c, &prompt)? {
                return Ok(());
            }
            let assigned = client.assign_private_ip(ip).await?;
            if ctx.json {
                return display::print_json(&assigned);
            }
            println!("Private addresses now assigned: {}", assigned.join(", "));
            Ok(())
        }

        PrivateIpCommand::Delete { ip, confirm: c } => {
            let ip = validate::ipv4(&ip)?;
            let (client, name) = ctx.client()?;
            if !confirm(c, &format!("Release private address {ip} from '{name}'?"))? {
                return Ok(());
            }
            client.delete_private_ip(ip).await?;
            println!("Released {ip}");
            Ok(())
        }
    }
}

pub async fn ptr(ctx: &Context, ip: IpAddr, hostname: &str) -> Result<()> {
    validate::not_empty(hostname, "PTR hostname")?;
    let (client, _) = ctx.client()?;
    client.set_ptr(ip, hostname).await?;
    println!("PTR for {ip} set to {hostname}");
    Ok(())
}
