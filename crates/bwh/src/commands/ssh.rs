use std::fs;
use std::path::Path;

use kiwivm_api::validate;

use super::{Context, confirm};
use crate::cli::SshCommand;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, cmd: SshCommand) -> Result<()> {
    match cmd {
        SshCommand::Get { full } => {
            let (client, name) = ctx.client()?;
            let keys = client.get_ssh_keys().await?;
            if ctx.json {
                return display::print_json(&keys);
            }

            let sets = if full {
                [keys.vm_keys(), keys.account_keys(), keys.preferred_keys()]
            } else {
                [
                    keys.shortened_vm_keys(),
                    keys.shortened_account_keys(),
                    keys.shortened_preferred_keys(),
                ]
            };
            let titles = ["VM-level keys", "Account-level keys", "Effective keys"];
            println!("SSH keys for '{name}'");
            for (title, set) in titles.iter().zip(&sets) {
                println!("\n{title} ({}):", set.len());
                if set.is_empty() {
                    println!("  none");
                }
                for key in set {
                    println!("  {key}");
                }
            }
            Ok(())
        }

        SshCommand::Set {
            mut keys,
            file,
            confirm: c,
        } => {
            if let Some(path) = file {
                keys.extend(read_keys(&path)?);
            }
            let keys: Vec<String> = keys
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            validate::not_empty(&keys.join(""), "SSH key list")?;
            validate::ssh_keys(&keys)?;

            let (client, name) = ctx.client()?;
            let prompt = format!(
                "Replace the VM-level SSH keys of '{name}' with {} key(s)?",
                keys.len()
            );
            if !confirm(c, &prompt)? {
                return Ok(());
            }
            client.update_ssh_keys(&keys).await?;
            println!("Updated {} key(s); they apply on the next OS reinstall", keys.len());
            Ok(())
        }

        SshCommand::Clear(c) => {
            let (client, name) = ctx.client()?;
            if !confirm(c, &format!("Remove all VM-level SSH keys from '{name}'?"))? {
                return Ok(());
            }
            client.update_ssh_keys::<&str>(&[]).await?;
            println!("VM-level SSH keys cleared");
            Ok(())
        }
    }
}

/// One key per line; blank lines and `#` comments are skipped.
fn read_keys(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_key_lines(&content))
}

fn parse_key_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_files_skip_comments_and_blanks() {
        let content = "# laptop\nssh-ed25519 AAAAC3Nza me@laptop\n\n  ssh-rsa AAAAB3Nza ci  \n";
        assert_eq!(
            parse_key_lines(content),
            vec!["ssh-ed25519 AAAAC3Nza me@laptop", "ssh-rsa AAAAB3Nza ci"]
        );
    }
}
