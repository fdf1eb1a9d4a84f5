use crate::config::Config;
use crate::document::RegistryDocument;
use crate::error::{RegistryError, Result};
use crate::paths;
use crate::store::RegistryStore;
use std::path::{Path, PathBuf};

/// An opened registry: the store plus the document loaded from it.
///
/// Mutations go through [`Registry::transact`], which edits a draft copy and
/// only adopts it once the save has succeeded. A failed save therefore leaves
/// the in-memory document exactly as it was.
///
/// There is no locking between processes: two invocations racing on the
/// same file both succeed and the later save wins.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    config: Config,
    store: RegistryStore,
    doc: RegistryDocument,
}

impl Registry {
    /// Open an existing registry. Fails with `RegistryNotFound` when there is
    /// no registry file.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with(root, Config::load(root)?)
    }

    pub fn open_with(root: &Path, config: Config) -> Result<Self> {
        let store = RegistryStore::new(root).with_max_backups(config.max_backups);
        let doc = store.load()?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            doc,
        })
    }

    /// Open the registry, or start from the default document when the file
    /// does not exist yet. Nothing is written until the first mutation.
    pub fn open_or_default(root: &Path) -> Result<Self> {
        Self::open_or_default_with(root, Config::load(root)?)
    }

    pub fn open_or_default_with(root: &Path, config: Config) -> Result<Self> {
        match Self::open_with(root, config.clone()) {
            Err(RegistryError::RegistryNotFound(path)) => {
                tracing::debug!(path = %path.display(), "no registry yet, using defaults");
                Ok(Self {
                    root: root.to_path_buf(),
                    store: RegistryStore::new(root).with_max_backups(config.max_backups),
                    config,
                    doc: RegistryDocument::default(),
                })
            }
            other => other,
        }
    }

    /// Write the default registry and config if they are missing. Returns
    /// whether the registry file was created.
    pub fn init(root: &Path) -> Result<(Self, bool)> {
        if !paths::config_path(root).exists() {
            Config::default().save(root)?;
        }

        let mut registry = Self::open_or_default(root)?;
        let created = !registry.store.exists();
        if created {
            let doc = registry.doc.clone();
            registry.store.save(&doc)?;
            tracing::info!(path = %registry.store.path().display(), "registry initialized");
        }
        Ok((registry, created))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn document(&self) -> &RegistryDocument {
        &self.doc
    }

    /// Absolute directory registered worktree paths are relative to.
    pub fn worktree_base(&self) -> PathBuf {
        paths::worktree_base(&self.root, &self.config.worktree_base)
    }

    /// On-disk location of a registered worktree path.
    pub fn resolve(&self, rel: &str) -> PathBuf {
        paths::resolve_worktree(&self.root, &self.config.worktree_base, rel)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Apply `f` to a draft of the document and persist it. The draft is
    /// dropped if `f` or the save fails.
    pub(crate) fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut RegistryDocument) -> Result<T>,
    ) -> Result<T> {
        let mut draft = self.doc.clone();
        let out = f(&mut draft)?;
        self.store.save(&draft)?;
        self.doc = draft;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    pub fn backup(&self) -> Result<PathBuf> {
        self.store.backup(&self.doc)
    }

    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        self.store.list_backups()
    }

    /// Replace the registry with `backup`. The current registry is backed up
    /// first so the restore itself can be undone.
    pub fn restore(&mut self, backup: &Path) -> Result<PathBuf> {
        // Validate before touching anything.
        let data = std::fs::read_to_string(backup)?;
        RegistryDocument::parse(&data).map_err(|reason| RegistryError::CorruptRegistry {
            path: backup.to_path_buf(),
            reason,
        })?;
        let safety = self.backup()?;
        self.doc = self.store.restore(backup)?;
        Ok(safety)
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
    fn open_requires_registry() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Registry::open(dir.path()),
            Err(RegistryError::RegistryNotFound(_))
        ));
    }

    #[test]
    fn open_or_default_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let reg = Registry::open_or_default(dir.path()).unwrap();
        assert_eq!(reg.document(), &RegistryDocument::default());
        assert!(!reg.store().exists());
    }

    #[test]
    fn open_or_default_still_reports_corruption() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".wtreg")).unwrap();
        std::fs::write(dir.path().join(".wtreg/registry.json"), "{oops").unwrap();
        assert!(matches!(
            Registry::open_or_default(dir.path()),
            Err(RegistryError::CorruptRegistry { .. })
        ));
    }

    #[test]
    fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (_, created) = Registry::init(dir.path()).unwrap();
        assert!(created);
        assert!(dir.path().join(".wtreg/config.yaml").exists());
        let (_, created) = Registry::init(dir.path()).unwrap();
        assert!(!created);
    }

    #[test]
    fn failed_save_discards_draft() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".wtreg"), "").unwrap();
        let mut reg = Registry::open_or_default_with(dir.path(), Config::default()).unwrap();

        let result = reg.transact(|doc| doc.set_port_range("web", 4000, 4001));
        assert!(matches!(result, Err(RegistryError::RegistryUnwritable { .. })));
        assert_eq!(reg.document(), &RegistryDocument::default());
    }

    #[test]
    fn restore_backs_up_current_first() {
        let dir = TempDir::new().unwrap();
        let (mut reg, _) = Registry::init(dir.path()).unwrap();
        let original = reg.backup().unwrap();
        reg.set_range("web", 4000, 4009).unwrap();

        let safety = reg.restore(&original).unwrap();
        assert_eq!(reg.document(), &RegistryDocument::default());
        let saved = std::fs::read_to_string(safety).unwrap();
        assert!(saved.contains("4009"));
    }
}
