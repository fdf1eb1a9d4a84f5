use crate::error::{RegistryError, Result};
use std::path::Path;

/// Check that `branch` resolves to a commit in the repository at `root`.
///
/// Without a `git` binary on `PATH` the check is skipped with a warning.
pub fn verify_branch(root: &Path, branch: &str) -> Result<()> {
    if branch.is_empty() || branch.starts_with('-') {
        return Err(RegistryError::BranchNotFound(branch.to_string()));
    }
    let Ok(git) = which::which("git") else {
        tracing::warn!(branch, "git not found on PATH, skipping branch check");
        return Ok(());
    };

    let output = std::process::Command::new(git)
        .args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("{branch}^{{commit}}"))
        .current_dir(root)
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(RegistryError::BranchNotFound(branch.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn option_like_branch_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            verify_branch(dir.path(), "--output=/tmp/x"),
            Err(RegistryError::BranchNotFound(_))
        ));
    }

    #[test]
    fn resolves_branches_in_real_repository() {
        if which::which("git").is_err() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let ok = git(dir.path(), &["init", "--quiet", "--initial-branch=trunk"])
            && git(
                dir.path(),
                &[
                    "-c",
                    "user.name=wtreg",
                    "-c",
                    "user.email=wtreg@example.invalid",
                    "commit",
                    "--quiet",
                    "--allow-empty",
                    "-m",
                    "init",
                ],
            );
        if !ok {
            // Older git without --initial-branch; nothing to check here.
            return;
        }
        verify_branch(dir.path(), "trunk").unwrap();
        assert!(matches!(
            verify_branch(dir.path(), "no-such-branch"),
            Err(RegistryError::BranchNotFound(_))
        ));
    }
}
