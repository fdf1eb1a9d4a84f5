use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use wtreg_core::Registry;

pub fn backup(root: &Path, list: bool, json: bool) -> anyhow::Result<()> {
    let registry = Registry::open(root).context("failed to load registry")?;

    if list {
        let backups = registry.list_backups()?;
        if json {
            print_json(&backups)?;
        } else if backups.is_empty() {
            println!("No backups.");
        } else {
            for b in backups {
                println!("{}", b.display());
            }
        }
        return Ok(());
    }

    let path = registry.backup().context("backup failed")?;
    if json {
        print_json(&serde_json::json!({ "backup": path }))?;
    } else {
        println!("Backup written to {}", path.display());
    }
    Ok(())
}

pub fn restore(root: &Path, backup: &Path, json: bool) -> anyhow::Result<()> {
    let mut registry = Registry::open_or_default(root).context("failed to load registry")?;
    let safety = registry
        .restore(backup)
        .with_context(|| format!("cannot restore {}", backup.display()))?;

    if json {
        print_json(&serde_json::json!({ "restored": backup, "previous": safety }))?;
    } else {
        println!("Restored registry from {}", backup.display());
        println!("Previous registry saved to {}", safety.display());
    }
    Ok(())
}
