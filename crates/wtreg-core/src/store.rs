use crate::document::RegistryDocument;
use crate::error::{RegistryError, Result};
use crate::io;
use crate::paths;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// The registry file and its backups.
///
/// Every failure is returned to the caller as-is; nothing here retries.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
}

impl RegistryStore {
    pub fn new(root: &Path) -> Self {
        Self {
            path: paths::registry_path(root),
            backups_dir: paths::backups_dir(root),
            max_backups: 0,
        }
    }

    /// Keep at most `max` backups; 0 keeps everything.
    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.max_backups = max;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    // -----------------------------------------------------------------------
    // Load / save
    // -----------------------------------------------------------------------

    pub fn load(&self) -> Result<RegistryDocument> {
        if !self.path.exists() {
            return Err(RegistryError::RegistryNotFound(self.path.clone()));
        }
        let data = std::fs::read_to_string(&self.path)?;
        self.parse(&self.path, &data)
    }

    fn parse(&self, path: &Path, data: &str) -> Result<RegistryDocument> {
        RegistryDocument::parse(data).map_err(|reason| RegistryError::CorruptRegistry {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn save(&self, doc: &RegistryDocument) -> Result<()> {
        let data = doc.to_json()?;
        io::atomic_write(&self.path, data.as_bytes()).map_err(|source| {
            RegistryError::RegistryUnwritable {
                path: self.path.clone(),
                source,
            }
        })?;
        tracing::debug!(path = %self.path.display(), "registry saved");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    /// Copy the registry to a timestamped file under the backups directory.
    /// The on-disk bytes are copied verbatim; `current` is only written when
    /// there is no file yet.
    pub fn backup(&self, current: &RegistryDocument) -> Result<PathBuf> {
        let data = if self.path.exists() {
            std::fs::read(&self.path)?
        } else {
            current.to_json()?.into_bytes()
        };

        // Counter keeps names unique and ordered within one timestamp.
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let mut n = 0u32;
        let mut target;
        loop {
            target = self
                .backups_dir
                .join(format!("{}{stamp}-{n:03}.json", paths::BACKUP_PREFIX));
            if !target.exists() {
                break;
            }
            n += 1;
        }

        io::atomic_write(&target, &data)?;
        tracing::info!(backup = %target.display(), "registry backed up");
        self.prune_backups()?;
        Ok(target)
    }

    /// Backups oldest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        if !self.backups_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(paths::BACKUP_PREFIX) && name.ends_with(".json") {
                backups.push(entry.path());
            }
        }
        // Timestamps sort lexically.
        backups.sort();
        Ok(backups)
    }

    fn prune_backups(&self) -> Result<()> {
        if self.max_backups == 0 {
            return Ok(());
        }
        let backups = self.list_backups()?;
        if backups.len() <= self.max_backups {
            return Ok(());
        }
        for old in &backups[..backups.len() - self.max_backups] {
            std::fs::remove_file(old)?;
            tracing::debug!(backup = %old.display(), "pruned backup");
        }
        Ok(())
    }

    /// Replace the registry with the contents of `backup`. The backup must
    /// parse; the replacement is atomic.
    pub fn restore(&self, backup: &Path) -> Result<RegistryDocument> {
        let data = std::fs::read_to_string(backup)?;
        let doc = self.parse(backup, &data)?;
        io::atomic_write(&self.path, data.as_bytes()).map_err(|source| {
            RegistryError::RegistryUnwritable {
                path: self.path.clone(),
                source,
            }
        })?;
        tracing::info!(backup = %backup.display(), "registry restored");
        Ok(doc)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
