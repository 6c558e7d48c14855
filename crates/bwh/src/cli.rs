use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Manage BandwagonHost (KiwiVM) VPS instances
#[derive(Parser, Debug)]
#[command(name = "bwh", version)]
#[command(about = "Manage BandwagonHost (KiwiVM) VPS instances", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file (YAML)
    #[arg(short, long, env = "BWH_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Instance to operate on (defaults to $BWH_INSTANCE, then the configured default)
    #[arg(short, long, global = true)]
    pub instance: Option<String>,

    /// Print raw JSON instead of formatted text
    #[arg(long, global = true)]
    pub json: bool,
}

/// Skip the confirmation prompt on destructive commands
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct Confirm {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage configured instances
    #[command(subcommand)]
    Node(NodeCommand),

    /// Show instance information
    Info {
        /// Include live hypervisor status (slow, up to ~15 seconds)
        #[arg(long)]
        live: bool,

        /// One-line summary
        #[arg(long)]
        compact: bool,
    },

    /// Start the VPS
    Start,

    /// Stop the VPS
    Stop(Confirm),

    /// Restart the VPS
    Restart(Confirm),

    /// Force-stop a stuck VPS (unsaved data is lost)
    Kill(Confirm),

    /// Set the VPS hostname
    Hostname { name: String },

    /// Generate and set a new root password
    ResetPassword(Confirm),

    /// Show remaining API call quota
    RateLimit,

    /// Summarise CPU, network and disk usage
    Usage {
        /// Lookback in days
        #[arg(short, long, default_value_t = 1)]
        days: u32,

        /// Bucket size: 5m, hour or day
        #[arg(short, long, default_value = "day")]
        group_by: String,
    },

    /// Show the audit log, newest first
    Audit {
        /// Maximum entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only entries at or after this RFC 3339 time
        #[arg(long)]
        since: Option<String>,

        /// Only entries whose requestor IP contains this text
        #[arg(long)]
        ip: Option<String>,
    },

    /// Manage snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// Manage backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Manage IPv6 /64 subnets
    #[command(subcommand)]
    Ipv6(Ipv6Command),

    /// Manage private IPv4 addresses
    #[command(subcommand)]
    PrivateIp(PrivateIpCommand),

    /// Set the reverse DNS (PTR) record for an address
    Ptr { ip: IpAddr, hostname: String },

    /// Manage SSH keys applied on reinstall
    #[command(subcommand)]
    Ssh(SshCommand),

    /// Boot from an ISO image
    #[command(subcommand)]
    Iso(IsoCommand),

    /// Reinstall the OS (destroys all data); lists templates when omitted
    Reinstall {
        os: Option<String>,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// Move the VPS to another location (IPv4 addresses change)
    #[command(subcommand)]
    Migrate(MigrateCommand),

    /// Serve read-only tools over MCP (stdio)
    Mcp,
}

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// Add an instance
    Add {
        name: String,

        #[arg(long, env = "BWH_API_KEY", hide_env_values = true)]
        api_key: String,

        #[arg(long)]
        veid: String,

        #[arg(long)]
        description: Option<String>,

        /// Alternative API base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Make this the default instance
        #[arg(long)]
        default: bool,

        /// Check the credentials against the API after adding
        #[arg(long)]
        validate: bool,
    },

    /// Remove an instance
    Remove {
        name: String,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// List instances
    List,

    /// Set the default instance
    SetDefault { name: String },

    /// Show one instance (API key masked)
    Show { name: Option<String> },

    /// Check that an instance's credentials work
    Validate { name: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Create a snapshot
    Create {
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List snapshots
    List {
        /// Only sticky snapshots
        #[arg(long)]
        sticky: bool,

        /// Filter by file name or description
        #[arg(long)]
        filter: Option<String>,

        /// Sort key: name, size or sticky
        #[arg(long, default_value = "name")]
        sort: String,

        #[arg(long)]
        desc: bool,
    },

    /// Delete a snapshot
    Delete {
        file_name: String,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// Restore a snapshot (overwrites all data)
    Restore {
        file_name: String,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// Set or clear the sticky flag (sticky snapshots are never purged)
    Sticky {
        file_name: String,

        /// Clear the flag instead of setting it
        #[arg(long)]
        off: bool,
    },

    /// Export a snapshot for import on another instance
    Export { file_name: String },

    /// Import a snapshot exported by another instance
    Import {
        source_veid: u64,
        source_token: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// List backups, newest first
    List {
        /// Filter by OS name
        #[arg(long)]
        os: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Copy a backup into a restorable snapshot
    #[command(alias = "copy-to-snapshot")]
    Copy {
        token: String,

        #[command(flatten)]
        confirm: Confirm,
    },
}

#[derive(Subcommand, Debug)]
pub enum Ipv6Command {
    /// List assigned IPv6 subnets
    List,

    /// Assign a new /64 subnet
    Add(Confirm),

    /// Release a /64 subnet
    Delete {
        subnet: String,

        #[command(flatten)]
        confirm: Confirm,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrivateIpCommand {
    /// List private addresses that can be assigned
    Available {
        /// Print every address instead of ranges
        #[arg(long)]
        all: bool,
    },

    /// Assign a private address (provider picks one when omitted)
    Assign {
        ip: Option<String>,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// Release a private address
    Delete {
        ip: String,

        #[command(flatten)]
        confirm: Confirm,
    },
}

#[derive(Subcommand, Debug)]
pub enum SshCommand {
    /// Show VM-level, account-level and effective keys
    #[command(alias = "list")]
    Get {
        /// Show full keys instead of shortened ones
        #[arg(long)]
        full: bool,
    },

    /// Replace the VM-level keys
    Set {
        keys: Vec<String>,

        /// Read keys from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// Remove all VM-level keys
    Clear(Confirm),
}

#[derive(Subcommand, Debug)]
pub enum IsoCommand {
    /// List available and mounted images
    Images,

    /// Mount an image (takes effect after a full stop and start)
    Mount {
        iso: String,

        #[command(flatten)]
        confirm: Confirm,
    },

    /// Unmount the image and boot from disk again
    Unmount(Confirm),
}

#[derive(Subcommand, Debug)]
pub enum MigrateCommand {
    /// List possible destinations
    Locations,

    /// Start a migration
    Start {
        location: String,

        /// Follow progress until the VPS unlocks
        #[arg(long)]
        wait: bool,

        /// Deadline for the whole migration, e.g. 15m, 1h, 90s
        #[arg(long, default_value = "15m", value_parser = parse_duration)]
        timeout: Duration,

        #[command(flatten)]
        confirm: Confirm,
    },
}

/// `90s`, `15m`, `1h30m`, or plain seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return positive(Duration::from_secs(secs), raw);
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(format!("invalid duration {raw:?}")),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {raw:?}"))?;
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration {raw:?} is too large"))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("invalid duration {raw:?}: missing unit"));
    }
    positive(Duration::from_secs(total), raw)
}

fn positive(d: Duration, raw: &str) -> Result<Duration, String> {
    if d.is_zero() {
        Err(format!("duration {raw:?} must be positive"))
    } else {
        Ok(d)
    }
}
