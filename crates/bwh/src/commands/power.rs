use kiwivm_api::validate;

use super::{Context, confirm};
use crate::cli::{Confirm, IsoCommand};
use crate::display;
use crate::error::Result;

pub async fn start(ctx: &Context) -> Result<()> {
    let (client, name) = ctx.client()?;
    client.start().await?;
    println!("Start requested for '{name}'");
    Ok(())
}

pub async fn stop(ctx: &Context, c: Confirm) -> Result<()> {
    let (client, name) = ctx.client()?;
    if !confirm(c, &format!("Stop '{name}'?"))? {
        return Ok(());
    }
    client.stop().await?;
    println!("Stop requested for '{name}'");
    Ok(())
}

pub async fn restart(ctx: &Context, c: Confirm) -> Result<()> {
    let (client, name) = ctx.client()?;
    if !confirm(c, &format!("Restart '{name}'?"))? {
        return Ok(());
    }
    client.restart().await?;
    println!("Restart requested for '{name}'");
    Ok(())
}

pub async fn kill(ctx: &Context, c: Confirm) -> Result<()> {
    let (client, name) = ctx.client()?;
    let prompt = format!("Force-stop '{name}'? Unsaved data in the VPS will be lost.");
    if !confirm(c, &prompt)? {
        return Ok(());
    }
    client.kill().await?;
    println!("Killed '{name}'");
    Ok(())
}

pub async fn hostname(ctx: &Context, hostname: &str) -> Result<()> {
    validate::not_empty(hostname, "hostname")?;
    let (client, name) = ctx.client()?;
    client.set_hostname(hostname).await?;
    println!("Hostname of '{name}' set to {hostname}");
    Ok(())
}

pub async fn reset_password(ctx: &Context, c: Confirm) -> Result<()> {
    let (client, name) = ctx.client()?;
    if !confirm(c, &format!("Generate a new root password for '{name}'?"))? {
        return Ok(());
    }
    let password = client.reset_root_password().await?;
    if ctx.json {
        return display::print_json(&serde_json::json!({ "password": password }));
    }
    println!("New root password: {password}");
    Ok(())
}

pub async fn reinstall(ctx: &Context, os: Option<String>, c: Confirm) -> Result<()> {
    let (client, name) = ctx.client()?;
    let available = client.get_available_os().await?;

    let Some(template) = os else {
        if ctx.json {
            return display::print_json(&available);
        }
        println!("Available templates for '{name}' (* = installed):");
        for t in &available.templates {
            let marker = if *t == available.installed { "*" } else { " " };
            println!("{marker} {t}");
        }
        return Ok(());
    };

    validate::os_template(&template, &available.templates)?;

    println!("Current OS : {}", available.installed);
    println!("New OS     : {template}");
    let prompt = format!("Reinstall '{name}'? ALL data on the VPS will be destroyed.");
    if !confirm(c, &prompt)? {
        return Ok(());
    }
    client.reinstall_os_checked(&template, &available).await?;
    println!("Reinstall of '{name}' started; new credentials are sent by email");
    Ok(())
}

pub async fn iso(ctx: &Context, cmd: IsoCommand) -> Result<()> {
    let (client, name) = ctx.client()?;
    match cmd {
        IsoCommand::Images => {
            let info = client.get_service_info().await?;
            let mounted: Vec<&str> = [&info.iso1, &info.iso2]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect();
            if ctx.json {
                return display::print_json(&serde_json::json!({
                    "mounted": mounted,
                    "available": info.available_isos,
                }));
            }

            if mounted.is_empty() {
                println!("Mounted: none");
            } else {
                println!("Mounted: {}", mounted.join(", "));
            }
            println!("\nAvailable images:");
            for iso in &info.available_isos {
                println!("  {iso}");
            }
            Ok(())
        }

        IsoCommand::Mount { iso, confirm: c } => {
            validate::not_empty(&iso, "ISO image")?;
            if !confirm(c, &format!("Mount {iso} on '{name}'?"))? {
                return Ok(());
            }
            client.mount_iso(&iso).await?;
            println!("Mounted {iso}. Fully stop and start the VPS to boot from it.");
            Ok(())
        }

        IsoCommand::Unmount(c) => {
            if !confirm(c, &format!("Unmount the ISO image from '{name}'?"))? {
                return Ok(());
            }
            client.unmount_iso().await?;
            println!("ISO unmounted. Fully stop and start the VPS to boot from disk.");
            Ok(())
        }
    }
}
