use crate::error::{RegistryError, Result};
use crate::io::normalize;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const REGISTRY_FILE: &str = ".wtreg/registry.json";
pub const CONFIG_FILE: &str = ".wtreg/config.yaml";
pub const BACKUPS_DIR: &str = ".wtreg/backups";

pub const BACKUP_PREFIX: &str = "registry-";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn registry_path(root: &Path) -> PathBuf {
    root.join(REGISTRY_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn backups_dir(root: &Path) -> PathBuf {
    root.join(BACKUPS_DIR)
}

/// Absolute location of the directory every registered worktree path is
/// relative to.
pub fn worktree_base(root: &Path, base: &Path) -> PathBuf {
    normalize(&root.join(base))
}

/// Resolve a registered relative worktree path to its on-disk location.
pub fn resolve_worktree(root: &Path, base: &Path, rel: &str) -> PathBuf {
    normalize(&worktree_base(root, base).join(rel))
}

/// Check that `rel` is usable as a registered worktree path: relative, free of
/// `..`, and resolving outside the main repository.
pub fn check_worktree_path(root: &Path, base: &Path, rel: &str) -> Result<PathBuf> {
    let conflict = |reason: &str| RegistryError::PathConflict {
        path: rel.to_string(),
        reason: reason.to_string(),
    };

    let candidate = Path::new(rel);
    if rel.is_empty() {
        return Err(conflict("path is empty"));
    }
    if candidate.is_absolute() || candidate.has_root() {
        return Err(conflict("path must be relative"));
    }
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(conflict("path must not contain '.' or '..' components"));
    }

    let resolved = resolve_worktree(root, base, rel);
    if resolved.starts_with(normalize(root)) {
        return Err(conflict("path resolves inside the main repository"));
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

/// Identifiers and rendered worktree names are single path segments.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 || !name_re().is_match(name) {
        return Err(RegistryError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
