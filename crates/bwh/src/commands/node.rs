use bwh_config::{Instance, ResolvedInstance};
use serde_json::json;

use super::{Context, confirm};
use crate::cli::NodeCommand;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, cmd: NodeCommand) -> Result<()> {
    match cmd {
        NodeCommand::Add {
            name,
            api_key,
            veid,
            description,
            endpoint,
            tags,
            default,
            validate,
        } => {
            let mut store = ctx.store()?;
            let instance = Instance {
                api_key,
                veid,
                description,
                endpoint,
                tags,
            };
            store.add(&name, instance, default)?;
            println!("Added instance '{name}' to {}", store.path().display());
            if store.default_instance() == Some(name.as_str()) {
                println!("'{name}' is the default instance");
            }
            if validate {
                check(&store.resolve_with(Some(name.as_str()), None)?).await?;
            }
            Ok(())
        }

        NodeCommand::Remove { name, confirm: c } => {
            let mut store = ctx.store()?;
            store.get(&name)?;
            if !confirm(c, &format!("Remove instance '{name}' from the config?"))? {
                return Ok(());
            }
            store.remove(&name)?;
            println!("Removed instance '{name}'");
            if let Some(default) = store.default_instance() {
                println!("Default instance: {default}");
            }
            Ok(())
        }

        NodeCommand::List => {
            let store = ctx.store()?;
            if ctx.json {
                let items: Vec<_> = store
                    .instances()
                    .iter()
                    .map(|(name, inst)| masked(name, inst, store.default_instance()))
                    .collect();
                return display::print_json(&items);
            }

            if store.instances().is_empty() {
                println!("No instances configured. Add one with `bwh node add <name>`.");
                return Ok(());
            }

            println!("{:<2}{:<20} {:<12} {}", "", "NAME", "VEID", "DESCRIPTION");
            for (name, inst) in store.instances() {
                let marker = if store.default_instance() == Some(name.as_str()) { "*" } else { "" };
                println!(
                    "{marker:<2}{name:<20} {:<12} {}",
                    inst.veid,
                    inst.description.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }

        NodeCommand::SetDefault { name } => {
            let mut store = ctx.store()?;
            store.set_default(&name)?;
            println!("Default instance set to '{name}'");
            Ok(())
        }

        NodeCommand::Show { name } => {
            let store = ctx.store()?;
            let resolved = store.resolve(name.as_deref().or(ctx.instance.as_deref()))?;
            let view = masked(&resolved.name, &resolved.instance, store.default_instance());
            if ctx.json {
                return display::print_json(&view);
            }

            println!("Instance    : {}", resolved.name);
            println!("VEID        : {}", resolved.instance.veid);
            println!("API key     : {}", mask_key(&resolved.instance.api_key));
            if let Some(desc) = &resolved.instance.description {
                println!("Description : {desc}");
            }
            if let Some(endpoint) = &resolved.instance.endpoint {
                println!("Endpoint    : {endpoint}");
            }
            if !resolved.instance.tags.is_empty() {
                println!("Tags        : {}", resolved.instance.tags.join(", "));
            }
            println!(
                "Default     : {}",
                display::yes_no(store.default_instance() == Some(resolved.name.as_str()))
            );
            Ok(())
        }

        NodeCommand::Validate { name } => {
            let store = ctx.store()?;
            let resolved = store.resolve(name.as_deref().or(ctx.instance.as_deref()))?;
            check(&resolved).await
        }
    }
}

/// One cheap authenticated call.
async fn check(resolved: &ResolvedInstance) -> Result<()> {
    println!("Validating '{}'...", resolved.name);
    let info = resolved.client().get_service_info().await?;
    println!(
        "OK: {} ({}, {})",
        info.hostname, info.plan, info.node_location
    );
    Ok(())
}

fn masked(name: &str, inst: &Instance, default: Option<&str>) -> serde_json::Value {
    json!({
        "name": name,
        "veid": inst.veid,
        "api_key": mask_key(&inst.api_key),
        "description": inst.description,
        "endpoint": inst.endpoint,
        "tags": inst.tags,
        "default": default == Some(name),
    })
}

/// First and last four characters.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key("private_abcdef123456"), "priv...3456");
        assert_eq!(mask_key("short"), "*****");
    }

    #[test]
    fn json_view_never_contains_the_key() {
        let inst = Instance::new("private_abcdef123456", "1001");
        let view = masked("tokyo", &inst, Some("tokyo"));
        assert_eq!(view["default"], true);
        assert!(!view.to_string().contains("private_abcdef123456"));
    }
}
