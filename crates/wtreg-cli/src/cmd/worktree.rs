use crate::output::{port_list, print_json, print_table};
use anyhow::Context;
use std::path::Path;
use std::str::FromStr;
use wtreg_core::{
    git,
    types::{Purpose, Status},
    worktree::{CreateRequest, Filter},
    Registry, RegistryError,
};

pub struct CreateArgs {
    pub purpose: String,
    pub identifier: String,
    pub branch: String,
    pub services: Vec<String>,
    pub issue: Option<String>,
    pub verify_branch: bool,
}

pub fn create(root: &Path, args: CreateArgs, json: bool) -> anyhow::Result<()> {
    let purpose = Purpose::from_str(&args.purpose)?;
    let mut registry = Registry::open_or_default(root).context("failed to load registry")?;

    if args.verify_branch && registry.config().verify_branch {
        git::verify_branch(root, &args.branch)?;
    }

    let mut request = CreateRequest::new(purpose, &args.identifier, &args.branch)
        .with_services(args.services);
    if let Some(issue) = args.issue {
        request = request.with_issue(issue);
    }

    let entry = registry
        .create(&request)
        .with_context(|| format!("cannot register {purpose} worktree '{}'", args.identifier))?;

    if json {
        print_json(&entry)?;
    } else {
        println!("Registered worktree: {}", entry.id);
        println!("Path:  {}", registry.resolve(&entry.path).display());
        if !entry.port_allocations.is_empty() {
            println!("Ports: {}", port_list(&entry.port_allocations));
        }
    }
    Ok(())
}

pub fn list(
    root: &Path,
    purpose: Option<String>,
    status: Option<String>,
    issue: Option<String>,
    has_ports: bool,
    json: bool,
) -> anyhow::Result<()> {
    let filter = Filter {
        purpose: purpose.as_deref().map(Purpose::from_str).transpose()?,
        status: status.as_deref().map(Status::from_str).transpose()?,
        issue,
        has_ports: has_ports.then_some(true),
    };
    let registry = Registry::open_or_default(root).context("failed to load registry")?;
    let entries = registry.query(&filter);

    if json {
        print_json(&entries)?;
        return Ok(());
    }

    if entries.is_empty() {
        println!("No worktrees registered.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.purpose.to_string(),
                e.status.to_string(),
                e.branch.clone(),
                port_list(&e.port_allocations),
                e.issue.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["ID", "PURPOSE", "STATUS", "BRANCH", "PORTS", "ISSUE"], rows);
    Ok(())
}

pub fn show(root: &Path, id: Option<&str>, issue: Option<&str>, json: bool) -> anyhow::Result<()> {
    let registry = Registry::open_or_default(root).context("failed to load registry")?;
    let entry = match (id, issue) {
        (Some(id), _) => registry.get(id)?,
        (None, Some(issue)) => registry
            .document()
            .find_by_issue(issue)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("issue {issue}")))?,
        (None, None) => anyhow::bail!("pass a worktree id or --issue"),
    };
    let id = entry.id.as_str();

    if json {
        let allocations: Vec<_> = registry.document().allocations_for(id).collect();
        print_json(&serde_json::json!({
            "worktree": entry,
            "allocations": allocations,
        }))?;
        return Ok(());
    }

    println!("Worktree: {}", entry.id);
    println!("Path:     {}", registry.resolve(&entry.path).display());
    println!("Branch:   {}", entry.branch);
    if entry.purpose.is_inferred() {
        println!("Purpose:  {} (inferred)", entry.purpose.purpose());
    } else {
        println!("Purpose:  {}", entry.purpose);
    }
    println!("Status:   {}", entry.status);
    if let Some(ref issue) = entry.issue {
        println!("Issue:    {issue}");
    }
    println!("Created:  {}", entry.created_at.format("%Y-%m-%d %H:%M"));

    let allocations: Vec<_> = registry.document().allocations_for(id).collect();
    if !allocations.is_empty() {
        println!("\nPorts:");
        for a in allocations {
            println!("  {:<6} {:<10} {}", a.port, a.service, a.description);
        }
    }
    Ok(())
}

pub fn set_status(root: &Path, id: &str, status: &str, json: bool) -> anyhow::Result<()> {
    let status = Status::from_str(status)?;
    let mut registry = Registry::open_or_default(root).context("failed to load registry")?;
    let entry = registry
        .update_status(id, status)
        .with_context(|| format!("cannot set '{id}' to {status}"))?;

    if json {
        print_json(&entry)?;
    } else {
        println!("{} is now {}", entry.id, entry.status);
    }
    Ok(())
}

pub fn remove(root: &Path, id: &str, force: bool, json: bool) -> anyhow::Result<()> {
    let mut registry = Registry::open_or_default(root).context("failed to load registry")?;
    let removal = registry
        .remove(id, force)
        .with_context(|| format!("cannot remove '{id}'"))?;

    if json {
        print_json(&removal)?;
        return Ok(());
    }

    println!("Removed worktree: {}", removal.id);
    if !removal.released.is_empty() {
        println!("Released ports: {}", port_list(&removal.released));
    }
    if !removal.unreleased.is_empty() {
        println!(
            "warning: ports without allocation records: {}",
            port_list(&removal.unreleased)
        );
    }
    Ok(())
}
