use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use wtreg_core::{
    probe::FsProbe,
    validate::{FixAction, Report},
    Registry,
};

pub fn run(root: &Path, fix: bool, json: bool) -> anyhow::Result<()> {
    let probe = FsProbe::new(root);

    if fix {
        let mut registry = Registry::open(root).context("failed to load registry")?;
        let outcome = registry.fix(&probe).context("repair failed")?;
        if json {
            print_json(&outcome)?;
            return Ok(());
        }
        println!("Backup written to {}", outcome.backup.display());
        if outcome.actions.is_empty() {
            println!("Nothing to repair.");
        }
        for action in &outcome.actions {
            println!("  {}", describe(action));
        }
        print_report(&outcome.report);
        return Ok(());
    }

    let registry = Registry::open(root).context("failed to load registry")?;
    let report = registry.validate(&probe).context("validation failed")?;
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(())
}

fn describe(action: &FixAction) -> String {
    match action {
        FixAction::RemovedOrphan { id, released } => {
            format!("removed orphaned worktree {id} (released {released:?})")
        }
        FixAction::Registered { id, purpose } => {
            format!("registered {id} as {} (inferred)", purpose.purpose())
        }
        FixAction::SkippedUnregistered { path, reason } => {
            format!("skipped {}: {reason}", path.display())
        }
        FixAction::ResolvedConflict {
            port,
            kept,
            released,
        } => format!("port {port}: kept {kept}, released {}", released.join(", ")),
        FixAction::DroppedDangling { port, owner } => {
            format!("dropped allocation {port} of missing worktree {owner}")
        }
        FixAction::DroppedMissingAllocation { port, owner } => {
            format!("dropped unrecorded port {port} from {owner}")
        }
        FixAction::RestoredBackReference { port, owner } => {
            format!("listed port {port} on {owner}")
        }
    }
}

fn print_report(report: &Report) {
    if report.is_clean() {
        println!("Registry is consistent.");
        return;
    }

    println!("{} issue(s) found:", report.issue_count());
    for o in &report.orphaned {
        println!("  orphaned      {} ({} missing)", o.id, o.path.display());
    }
    for m in &report.mismatched {
        println!("  mismatched    {} ({})", m.id, m.reason);
    }
    for u in &report.unregistered {
        println!(
            "  unregistered  {} [{}]",
            u.path.display(),
            u.branch.as_deref().unwrap_or("detached")
        );
    }
    for id in &report.duplicate_ids {
        println!("  duplicate id  {id}");
    }
    for path in &report.duplicate_paths {
        println!("  duplicate path {path}");
    }
    for c in &report.port_conflicts {
        println!("  conflict      port {} held by {}", c.port, c.owners.join(", "));
    }
    for d in &report.dangling_allocations {
        println!("  dangling      port {} owned by missing {}", d.port, d.owner);
    }
    for m in &report.missing_allocations {
        println!("  unrecorded    port {} listed on {}", m.port, m.owner);
    }
    for m in &report.missing_back_references {
        println!("  unlisted      port {} not listed on {}", m.port, m.owner);
    }
    for r in &report.out_of_range {
        println!("  out of range  port {} ({}) of {}: {}", r.port, r.service, r.owner, r.reason);
    }
}
