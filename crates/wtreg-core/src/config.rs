use crate::error::Result;
use crate::io;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Operator settings read from `.wtreg/config.yaml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory registered worktree paths are relative to, itself relative
    /// to the repository root.
    #[serde(default = "default_worktree_base")]
    pub worktree_base: PathBuf,
    /// Address the availability probe binds on.
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    /// Check that the branch exists before registering a worktree.
    #[serde(default = "default_verify_branch")]
    pub verify_branch: bool,
    /// Number of registry backups to keep; 0 keeps all of them.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

fn default_worktree_base() -> PathBuf {
    PathBuf::from("..")
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

fn default_verify_branch() -> bool {
    true
}

fn default_max_backups() -> usize {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worktree_base: default_worktree_base(),
            probe_host: default_probe_host(),
            verify_branch: default_verify_branch(),
            max_backups: default_max_backups(),
        }
    }
}

impl Config {
    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load the config, falling back to defaults when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&path, data.as_bytes())?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.worktree_base.is_absolute() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "worktree_base '{}' is absolute; registered paths stay relative to it",
                    self.worktree_base.display()
                ),
            });
        }

        let base = paths::worktree_base(root, &self.worktree_base);
        if base.starts_with(io::normalize(root)) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "worktree_base '{}' resolves inside the repository; every create will fail",
                    self.worktree_base.display()
                ),
            });
        }

        if self.probe_host.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "probe_host is empty".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.worktree_base, PathBuf::from(".."));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".wtreg")).unwrap();
        std::fs::write(
            dir.path().join(".wtreg/config.yaml"),
            "worktree_base: ../trees\nmax_backups: 3\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.worktree_base, PathBuf::from("../trees"));
        assert_eq!(cfg.max_backups, 3);
        assert!(cfg.verify_branch);
        assert_eq!(cfg.probe_host, "127.0.0.1");
    }

    #[test]
    fn config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            verify_branch: false,
            ..Config::default()
        };
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn validate_default_is_clean() {
        let cfg = Config::default();
        assert!(cfg.validate(Path::new("/srv/repo")).is_empty());
    }

    #[test]
    fn validate_flags_base_inside_repo() {
        let cfg = Config {
            worktree_base: PathBuf::from(".worktrees"),
            probe_host: String::new(),
            ..Config::default()
        };
        let warnings = cfg.validate(Path::new("/srv/repo"));
        assert_eq!(
            warnings.iter().filter(|w| w.level == WarnLevel::Error).count(),
            2
        );
    }
}
