use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use wtreg_core::{config::ConfigWarning, Registry};

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (registry, created) = Registry::init(root).context("failed to initialize registry")?;
    let warnings: Vec<ConfigWarning> = registry.config().validate(root);

    if json {
        print_json(&serde_json::json!({
            "registry": registry.store().path(),
            "created": created,
            "warnings": warnings,
        }))?;
        return Ok(());
    }

    if created {
        println!("Initialized registry at {}", registry.store().path().display());
    } else {
        println!("Registry already exists at {}", registry.store().path().display());
    }
    println!("Worktrees live under {}", registry.worktree_base().display());
    for w in &warnings {
        println!("warning: {}", w.message);
    }
    Ok(())
}
