use kiwivm_api::migrate::{self, MigrationEvent, MigrationOptions};
use kiwivm_api::{LockingInfo, MigrateLocations, MigrateStartResponse, validate};

use super::{Context, confirm};
use crate::cli::MigrateCommand;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, cmd: MigrateCommand) -> Result<()> {
    match cmd {
        MigrateCommand::Locations => {
            let (client, _) = ctx.client()?;
            let locations = client.get_migrate_locations().await?;
            if ctx.json {
                return display::print_json(&locations);
            }
            print_locations(&locations);
            Ok(())
        }

        MigrateCommand::Start {
            location,
            wait,
            timeout,
            confirm: c,
        } => {
            validate::not_empty(&location, "location")?;
            let (client, name) = ctx.client()?;

            println!("WARNING: all IPv4 addresses of '{name}' will change after migration.");
            if !confirm(c, &format!("Migrate '{name}' to {location}?"))? {
                return Ok(());
            }

            if !wait {
                let resp = client.start_migration(&location, timeout).await?;
                if ctx.json {
                    return display::print_json(&resp);
                }
                println!("Migration to {location} accepted");
                print_accepted(&resp);
                println!("Follow progress with `bwh migrate locations` until the VPS unlocks.");
                return Ok(());
            }

            let json = ctx.json;
            let outcome = migrate::wait_for_migration(
                &client,
                &location,
                MigrationOptions::with_timeout(timeout),
                |event| {
                    if !json {
                        print_event(&event);
                    }
                },
            )
            .await?;

            if json {
                return display::print_json(&serde_json::json!({
                    "current_location": outcome.current_location,
                    "new_ips": outcome.accepted.as_ref().map(|a| &a.new_ips),
                    "notification_email": outcome.accepted.as_ref().map(|a| &a.notification_email),
                }));
            }
            println!("Migration finished; '{name}' is now in {}", outcome.current_location);
            if let Some(resp) = &outcome.accepted {
                display::print_ip_families("New IP addresses", &resp.new_ips);
            }
            Ok(())
        }
    }
}

fn print_locations(locations: &MigrateLocations) {
    println!("Current location: {}", locations.current_location);
    if locations.locations.is_empty() {
        println!("No migration destinations available.");
        return;
    }

    let mut ids = locations.locations.clone();
    ids.sort();
    println!("\nDestinations:");
    for id in &ids {
        let desc = locations
            .descriptions
            .get(id)
            .map(String::as_str)
            .filter(|d| !d.is_empty())
            .unwrap_or("(no description)");
        let multiplier = locations
            .data_transfer_multipliers
            .get(id)
            .map(|m| m.get())
            .filter(|m| *m > 1)
            .map(|m| format!("  [data x{m}]"))
            .unwrap_or_default();
        println!("  {id:<12} {desc}{multiplier}");
    }
}

fn print_accepted(resp: &MigrateStartResponse) {
    if !resp.notification_email.is_empty() {
        println!("A notification will be sent to {}", resp.notification_email);
    }
    display::print_ip_families("New IP addresses", &resp.new_ips);
}

fn print_event(event: &MigrationEvent) {
    match event {
        MigrationEvent::Accepted(resp) => {
            println!("Migration accepted, waiting for the VPS to unlock...");
            print_accepted(resp);
        }
        MigrationEvent::Operation(op) => println!("Operation: {op}"),
        MigrationEvent::Progress(info) => println!("{}", progress_line(info)),
    }
}

fn progress_line(info: &LockingInfo) -> String {
    let mut line = format!(
        "Progress: {}% complete - {}",
        info.completed_percent, info.friendly_progress_message
    );
    if info.last_status_update_secs_ago > 0 {
        line.push_str(&format!(" (updated {}s ago)", info.last_status_update_secs_ago));
    }
    line
}
