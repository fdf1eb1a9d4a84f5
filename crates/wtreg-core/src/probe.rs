//! Checks against the live system: whether a port can be bound, and what is
//! actually on disk at a registered worktree path.

use crate::config::Config;
use crate::error::Result;
use crate::io::normalize;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

pub trait PortProbe {
    /// Whether a listener could be bound on `port` right now.
    fn can_bind(&self, port: u16) -> bool;
}

/// Binds a TCP listener and drops it straight away.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.probe_host.clone())
    }
}

impl PortProbe for TcpProbe {
    fn can_bind(&self, port: u16) -> bool {
        // Binding 0 asks the OS for any free port.
        if port == 0 {
            return false;
        }
        match TcpListener::bind((self.host.as_str(), port)) {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                tracing::debug!(host = %self.host, port, error = %e, "port probe failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worktrees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorktreeState {
    Missing,
    /// Something is at the path but it is not a linked worktree of this
    /// repository.
    NotAWorktree { reason: String },
    Worktree {
        gitdir: PathBuf,
        /// `None` for a detached HEAD or an unreadable HEAD file.
        branch: Option<String>,
    },
}

pub trait WorktreeProbe {
    fn inspect(&self, dir: &Path) -> WorktreeState;

    /// Linked worktrees of this repository directly under `base`.
    fn discover(&self, base: &Path) -> Result<Vec<PathBuf>>;
}

/// Reads the `.git` file Git leaves in every linked worktree
/// (`gitdir: <repo>/.git/worktrees/<name>`).
#[derive(Debug, Clone)]
pub struct FsProbe {
    repo_root: PathBuf,
}

impl FsProbe {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn worktrees_admin_dir(&self) -> Option<PathBuf> {
        let git = self.repo_root.join(".git");
        git.is_dir().then(|| canonical(&git.join("worktrees")))
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize(path))
}

fn read_branch(gitdir: &Path) -> Option<String> {
    let head = std::fs::read_to_string(gitdir.join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

impl WorktreeProbe for FsProbe {
    fn inspect(&self, dir: &Path) -> WorktreeState {
        let not = |reason: &str| WorktreeState::NotAWorktree {
            reason: reason.to_string(),
        };

        if !dir.exists() {
            return WorktreeState::Missing;
        }
        if !dir.is_dir() {
            return not("not a directory");
        }

        let marker = dir.join(".git");
        if marker.is_dir() {
            return not("standalone repository, not a linked worktree");
        }
        let Ok(contents) = std::fs::read_to_string(&marker) else {
            return not("no .git file");
        };
        let Some(target) = contents
            .lines()
            .find_map(|l| l.strip_prefix("gitdir:"))
            .map(str::trim)
        else {
            return not("malformed .git file");
        };

        let gitdir = canonical(&dir.join(target));
        if let Some(admin) = self.worktrees_admin_dir() {
            if !gitdir.starts_with(&admin) {
                return not("linked to another repository");
            }
        }

        let branch = read_branch(&gitdir);
        WorktreeState::Worktree { gitdir, branch }
    }

    fn discover(&self, base: &Path) -> Result<Vec<PathBuf>> {
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let repo = canonical(&self.repo_root);

        let mut found = Vec::new();
        for entry in std::fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            if canonical(&path) == repo {
                continue;
            }
            if matches!(self.inspect(&path), WorktreeState::Worktree { .. }) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
