mod info;
mod migrate;
mod network;
mod node;
mod power;
mod snapshot;
mod ssh;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use bwh_config::{ConfigStore, ResolvedInstance};
use kiwivm_api::KiwiClient;

use crate::cli::{Cli, Command, Confirm};
use crate::error::{CliError, Result};

/// Global flags shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub instance: Option<String>,
    pub json: bool,
}

impl Context {
    pub fn store(&self) -> Result<ConfigStore> {
        Ok(ConfigStore::open(self.config_path.clone())?)
    }

    pub fn resolve(&self) -> Result<ResolvedInstance> {
        Ok(self.store()?.resolve(self.instance.as_deref())?)
    }

    /// Client for the resolved instance, plus its name for messages.
    pub fn client(&self) -> Result<(KiwiClient, String)> {
        let resolved = self.resolve()?;
        tracing::debug!(instance = %resolved.name, veid = resolved.veid, "using instance");
        Ok((resolved.client(), resolved.name))
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Context {
        config_path: cli.config,
        instance: cli.instance,
        json: cli.json,
    };

    match cli.command {
        Command::Node(cmd) => node::run(&ctx, cmd).await,
        Command::Info { live, compact } => info::info(&ctx, live, compact).await,
        Command::Start => power::start(&ctx).await,
        Command::Stop(confirm) => power::stop(&ctx, confirm).await,
        Command::Restart(confirm) => power::restart(&ctx, confirm).await,
        Command::Kill(confirm) => power::kill(&ctx, confirm).await,
        Command::Hostname { name } => power::hostname(&ctx, &name).await,
        Command::ResetPassword(confirm) => power::reset_password(&ctx, confirm).await,
        Command::RateLimit => info::rate_limit(&ctx).await,
        Command::Usage { days, group_by } => info::usage(&ctx, days, &group_by).await,
        Command::Audit { limit, since, ip } => info::audit(&ctx, limit, since, ip).await,
        Command::Snapshot(cmd) => snapshot::run(&ctx, cmd).await,
        Command::Backup(cmd) => snapshot::run_backup(&ctx, cmd).await,
        Command::Ipv6(cmd) => network::ipv6(&ctx, cmd).await,
        Command::PrivateIp(cmd) => network::private_ip(&ctx, cmd).await,
        Command::Ptr { ip, hostname } => network::ptr(&ctx, ip, &hostname).await,
        Command::Ssh(cmd) => ssh::run(&ctx, cmd).await,
        Command::Iso(cmd) => power::iso(&ctx, cmd).await,
        Command::Reinstall { os, confirm } => power::reinstall(&ctx, os, confirm).await,
        Command::Migrate(cmd) => migrate::run(&ctx, cmd).await,
        Command::Mcp => crate::mcp::serve(ctx.config_path, ctx.instance).await,
    }
}

/// Ask `prompt [y/N]` on stdin unless `--yes` was given. Returns `false` (and
/// says so) when the user declines.
pub fn confirm(confirm: Confirm, prompt: &str) -> Result<bool> {
    if confirm.yes {
        return Ok(true);
    }

    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;
    let accepted = read_answer(io::stdin().lock())?;
    if !accepted {
        println!("Operation cancelled.");
    }
    Ok(accepted)
}

fn read_answer<R: BufRead>(mut reader: R) -> Result<bool> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        println!();
        return Err(CliError::Cancelled);
    }
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
