use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use wtreg_core::{probe::TcpProbe, Registry};

#[derive(Subcommand)]
pub enum PortSubcommand {
    /// Reserve the lowest free port of a service for a worktree
    Allocate {
        service: String,
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Release a port (no-op if it is not allocated)
    Release {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
    /// Whether a port is free in the registry and bindable on this host
    Check {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
    /// Preview the port `allocate` would hand out
    FindNext { service: String },
    /// List allocations
    List,
    /// Show the configured service ranges
    Ranges,
    /// Reconfigure a service range
    SetRange {
        service: String,
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        start: u16,
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        end: u16,
    },
}

pub fn run(root: &Path, subcmd: PortSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PortSubcommand::Allocate {
            service,
            owner,
            description,
        } => allocate(root, &service, &owner, &description, json),
        PortSubcommand::Release { port } => release(root, port, json),
        PortSubcommand::Check { port } => check(root, port, json),
        PortSubcommand::FindNext { service } => find_next(root, &service, json),
        PortSubcommand::List => list(root, json),
        PortSubcommand::Ranges => ranges(root, json),
        PortSubcommand::SetRange {
            service,
            start,
            end,
        } => set_range(root, &service, start, end, json),
    }
}

fn open(root: &Path) -> anyhow::Result<Registry> {
    Registry::open_or_default(root).context("failed to load registry")
}

fn allocate(
    root: &Path,
    service: &str,
    owner: &str,
    description: &str,
    json: bool,
) -> anyhow::Result<()> {
    let mut registry = open(root)?;
    let port = registry
        .allocate(service, owner, description)
        .with_context(|| format!("cannot allocate a {service} port for '{owner}'"))?;

    if json {
        print_json(&serde_json::json!({ "port": port, "service": service, "owner": owner }))?;
    } else {
        println!("{port}");
    }
    Ok(())
}

fn release(root: &Path, port: u16, json: bool) -> anyhow::Result<()> {
    let mut registry = open(root)?;
    let released = registry.release(port)?;

    if json {
        print_json(&serde_json::json!({ "port": port, "released": released }))?;
    } else if released {
        println!("Released port {port}");
    } else {
        println!("Port {port} was not allocated");
    }
    Ok(())
}

fn check(root: &Path, port: u16, json: bool) -> anyhow::Result<()> {
    let registry = open(root)?;
    let reserved = registry.document().is_port_reserved(port);
    let probe = TcpProbe::from_config(registry.config());
    let available = registry.is_available(port, &probe);

    if json {
        print_json(&serde_json::json!({
            "port": port,
            "available": available,
            "reserved": reserved,
        }))?;
    } else {
        println!("{available}");
    }
    Ok(())
}

fn find_next(root: &Path, service: &str, json: bool) -> anyhow::Result<()> {
    let registry = open(root)?;
    let port = registry.find_next(service)?;

    if json {
        print_json(&serde_json::json!({ "port": port, "service": service }))?;
    } else {
        println!("{port}");
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let registry = open(root)?;
    let allocations = &registry.document().port_allocations;

    if json {
        print_json(allocations)?;
        return Ok(());
    }
    if allocations.is_empty() {
        println!("No ports allocated.");
        return Ok(());
    }

    let mut rows: Vec<Vec<String>> = allocations
        .iter()
        .map(|a| {
            vec![
                a.port.to_string(),
                a.service.clone(),
                a.owner.clone(),
                a.allocated_at.format("%Y-%m-%d %H:%M").to_string(),
                a.description.clone(),
            ]
        })
        .collect();
    rows.sort_by_key(|r| r[0].parse::<u16>().unwrap_or(0));
    print_table(&["PORT", "SERVICE", "OWNER", "ALLOCATED", "DESCRIPTION"], rows);
    Ok(())
}

fn ranges(root: &Path, json: bool) -> anyhow::Result<()> {
    let registry = open(root)?;
    let table = &registry.document().port_ranges;

    if json {
        print_json(table)?;
        return Ok(());
    }

    let occupied = registry.document().occupied_ports();
    let rows: Vec<Vec<String>> = table
        .iter()
        .map(|(service, range)| {
            let used = occupied.iter().filter(|p| range.contains(**p)).count();
            vec![
                service.to_string(),
                range.start.to_string(),
                range.end.to_string(),
                format!("{used}/{}", range.len()),
            ]
        })
        .collect();
    print_table(&["SERVICE", "START", "END", "USED"], rows);
    Ok(())
}

fn set_range(root: &Path, service: &str, start: u16, end: u16, json: bool) -> anyhow::Result<()> {
    let mut registry = open(root)?;
    registry
        .set_range(service, start, end)
        .with_context(|| format!("cannot set range for '{service}'"))?;

    if json {
        print_json(&serde_json::json!({ "service": service, "start": start, "end": end }))?;
    } else {
        println!("{service}: {start}-{end}");
    }
    Ok(())
}
