mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::port::PortSubcommand;
use std::path::PathBuf;
use wtreg_core::RegistryError;

#[derive(Parser)]
#[command(
    name = "wtreg",
    about = "Worktree registry: tracks worktrees and the ports they hold",
    version,
    propagate_version = true
)]
struct Cli {
    /// Repository root (default: auto-detect from .wtreg/ or .git)
    #[arg(long, global = true, env = "WTREG_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default registry and config if missing
    Init,

    /// Register a worktree and reserve its ports
    Create {
        /// review, feature, bugfix, hotfix, experiment, refactor, docs or test
        purpose: String,
        /// Fills the purpose's naming template (e.g. GH-42)
        identifier: String,
        /// Branch checked out in the worktree
        #[arg(long)]
        branch: String,
        /// Reserve one port for this service (repeatable)
        #[arg(long = "port", value_name = "SERVICE")]
        services: Vec<String>,
        /// Tracker reference, if it differs from the identifier
        #[arg(long)]
        issue: Option<String>,
        /// Skip the check that the branch exists
        #[arg(long)]
        no_verify_branch: bool,
    },

    /// List registered worktrees
    List {
        #[arg(long)]
        purpose: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        issue: Option<String>,
        /// Only worktrees holding at least one port
        #[arg(long)]
        has_ports: bool,
    },

    /// Show one worktree
    Show {
        #[arg(required_unless_present = "issue")]
        id: Option<String>,
        /// Show the first worktree recorded for this issue instead
        #[arg(long, conflicts_with = "id")]
        issue: Option<String>,
    },

    /// Change a worktree's status (active, locked, pending-removal)
    Status { id: String, status: String },

    /// Remove a worktree and release its ports
    Remove {
        id: String,
        /// Remove even when locked
        #[arg(long)]
        force: bool,
    },

    /// Check the registry against the filesystem
    Validate {
        /// Repair what can be repaired (a backup is written first)
        #[arg(long)]
        fix: bool,
    },

    /// Allocate, release and inspect ports
    Port {
        #[command(subcommand)]
        subcommand: PortSubcommand,
    },

    /// Write a timestamped copy of the registry
    Backup {
        /// List existing backups instead
        #[arg(long)]
        list: bool,
    },

    /// Replace the registry with a backup
    Restore { backup: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, json),
        Commands::Create {
            purpose,
            identifier,
            branch,
            services,
            issue,
            no_verify_branch,
        } => cmd::worktree::create(
            &root,
            cmd::worktree::CreateArgs {
                purpose,
                identifier,
                branch,
                services,
                issue,
                verify_branch: !no_verify_branch,
            },
            json,
        ),
        Commands::List {
            purpose,
            status,
            issue,
            has_ports,
        } => cmd::worktree::list(&root, purpose, status, issue, has_ports, json),
        Commands::Show { id, issue } => {
            cmd::worktree::show(&root, id.as_deref(), issue.as_deref(), json)
        }
        Commands::Status { id, status } => cmd::worktree::set_status(&root, &id, &status, json),
        Commands::Remove { id, force } => cmd::worktree::remove(&root, &id, force, json),
        Commands::Validate { fix } => cmd::validate::run(&root, fix, json),
        Commands::Port { subcommand } => cmd::port::run(&root, subcommand, json),
        Commands::Backup { list } => cmd::backup::backup(&root, list, json),
        Commands::Restore { backup } => cmd::backup::restore(&root, &backup, json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Scripted callers branch on the exit code, so every registry error kind
/// maps to its own code.
fn exit_code(e: &anyhow::Error) -> i32 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<RegistryError>())
        .map_or(1, RegistryError::exit_code)
}
