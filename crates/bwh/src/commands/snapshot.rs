use kiwivm_api::validate;

use super::{Context, confirm};
use crate::cli::{BackupCommand, SnapshotCommand};
use crate::display::{self, format_bytes, format_timestamp};
use crate::error::{CliError, Result};
use crate::query::{self, BackupQuery, SnapshotQuery, SnapshotSort, SortOrder};

pub async fn run(ctx: &Context, cmd: SnapshotCommand) -> Result<()> {
    // Reject bad listing flags before resolving an instance.
    if let SnapshotCommand::List { sort, .. } = &cmd {
        if !matches!(sort.as_str(), "name" | "size" | "sticky") {
            return Err(CliError::Usage(format!(
                "invalid --sort {sort:?}: expected name, size or sticky"
            )));
        }
    }

    let (client, name) = ctx.client()?;
    match cmd {
        SnapshotCommand::Create { description } => {
            let resp = client.create_snapshot(description.as_deref()).await?;
            if ctx.json {
                return display::print_json(&resp);
            }
            println!("Snapshot of '{name}' requested");
            if !resp.notification_email.is_empty() {
                println!("A notification will be sent to {}", resp.notification_email);
            }
            Ok(())
        }

        SnapshotCommand::List {
            sticky,
            filter,
            sort,
            desc,
        } => {
            let snapshots = client.list_snapshots().await?;
            let items = query::filter_snapshots(
                &snapshots,
                &SnapshotQuery {
                    sticky_only: sticky,
                    name_contains: filter,
                    sort_by: SnapshotSort::parse(Some(sort.as_str())),
                    order: if desc { SortOrder::Desc } else { SortOrder::Asc },
                    limit: None,
                },
            );
            if ctx.json {
                return display::print_json(&items);
            }
            if items.is_empty() {
                println!("No snapshots.");
                return Ok(());
            }

            println!(
                "{:<48} {:>10} {:<6} {:<24} {}",
                "FILE", "SIZE", "STICKY", "OS", "DESCRIPTION"
            );
            for s in &items {
                println!(
                    "{:<48} {:>10} {:<6} {:<24} {}",
                    s.file_name,
                    format_bytes(s.size.get()),
                    display::yes_no(s.sticky),
                    s.os,
                    s.description
                );
            }
            Ok(())
        }

        SnapshotCommand::Delete {
            file_name,
            confirm: c,
        } => {
            validate::not_empty(&file_name, "snapshot file name")?;
            if !confirm(c, &format!("Delete snapshot {file_name}?"))? {
                return Ok(());
            }
            client.delete_snapshot(&file_name).await?;
            println!("Deleted snapshot {file_name}");
            Ok(())
        }

        SnapshotCommand::Restore {
            file_name,
            confirm: c,
        } => {
            validate::not_empty(&file_name, "snapshot file name")?;
            let prompt = format!(
                "Restore {file_name} onto '{name}'? All current data on the VPS will be overwritten."
            );
            if !confirm(c, &prompt)? {
                return Ok(());
            }
            client.restore_snapshot(&file_name).await?;
            println!("Restore of {file_name} started");
            Ok(())
        }

        SnapshotCommand::Sticky { file_name, off } => {
            validate::not_empty(&file_name, "snapshot file name")?;
            client.toggle_snapshot_sticky(&file_name, !off).await?;
            if off {
                println!("{file_name} is no longer sticky");
            } else {
                println!("{file_name} is now sticky and will not be purged");
            }
            Ok(())
        }

        SnapshotCommand::Export { file_name } => {
            validate::not_empty(&file_name, "snapshot file name")?;
            let token = client.export_snapshot(&file_name).await?;
            if ctx.json {
                return display::print_json(&serde_json::json!({
                    "veid": client.veid(),
                    "token": token,
                }));
            }
            println!("Exported {file_name}");
            println!("Import it elsewhere with:");
            println!("  bwh snapshot import {} {token}", client.veid());
            Ok(())
        }

        SnapshotCommand::Import {
            source_veid,
            source_token,
        } => {
            validate::not_empty(&source_token, "source token")?;
            client.import_snapshot(source_veid, &source_token).await?;
            println!("Import from VEID {source_veid} into '{name}' started");
            Ok(())
        }
    }
}

pub async fn run_backup(ctx: &Context, cmd: BackupCommand) -> Result<()> {
    match cmd {
        BackupCommand::List { os, limit } => {
            let (client, _) = ctx.client()?;
            let backups = client.list_backups().await?;
            let items = query::filter_backups(
                backups.into_values(),
                &BackupQuery {
                    os_contains: os,
                    limit,
                    ..Default::default()
                },
            );
            if ctx.json {
                return display::print_json(&items);
            }
            if items.is_empty() {
                println!("No backups.");
                return Ok(());
            }

            println!("{:<42} {:<20} {:>10} {}", "TOKEN", "CREATED", "SIZE", "OS");
            for b in &items {
                println!(
                    "{:<42} {:<20} {:>10} {}",
                    b.token,
                    format_timestamp(b.timestamp),
                    format_bytes(b.size),
                    b.os
                );
            }
            Ok(())
        }

        BackupCommand::Copy { token, confirm: c } => {
            validate::backup_token(&token)?;
            let (client, name) = ctx.client()?;
            if !confirm(c, &format!("Copy backup {token} to a snapshot on '{name}'?"))? {
                return Ok(());
            }
            client.copy_backup_to_snapshot(&token).await?;
            println!("Backup copy started; it appears under `bwh snapshot list` when done");
            Ok(())
        }
    }
}
