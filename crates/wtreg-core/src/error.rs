use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry not found at {0}: run 'wtreg init'")]
    RegistryNotFound(PathBuf),

    #[error("corrupt registry {path}: {reason}")]
    CorruptRegistry { path: PathBuf, reason: String },

    #[error("registry {path} is not writable: {source}")]
    RegistryUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worktree not found: {0}")]
    NotFound(String),

    #[error("worktree id already registered: {0}")]
    DuplicateId(String),

    #[error("path conflict for '{path}': {reason}")]
    PathConflict { path: String, reason: String },

    #[error("worktree '{0}' is locked: pass --force to remove it")]
    EntryLocked(String),

    #[error("worktree '{0}' is pending removal")]
    EntryPendingRemoval(String),

    #[error("invalid status transition for '{id}': {from} -> {to}")]
    InvalidStatusTransition { id: String, from: String, to: String },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid purpose: {0}")]
    InvalidPurpose(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("no free port for '{service}' in range {start}-{end}")]
    RangeExhausted { service: String, start: u16, end: u16 },

    #[error("invalid range for '{service}': {reason}")]
    RangeConflict { service: String, reason: String },

    #[error("no naming template registered for purpose '{0}'")]
    MissingTemplate(String),

    #[error("invalid naming template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("invalid identifier '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidIdentifier(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RegistryError {
    /// Stable process exit code for scripted callers. `2` is left to clap's
    /// argument errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            RegistryError::DuplicateId(_) => 3,
            RegistryError::BranchNotFound(_) => 4,
            RegistryError::RegistryUnwritable { .. } => 5,
            RegistryError::RangeExhausted { .. } => 6,
            RegistryError::NotFound(_) => 7,
            RegistryError::EntryLocked(_) => 8,
            RegistryError::PathConflict { .. } => 9,
            RegistryError::InvalidStatusTransition { .. } => 10,
            RegistryError::UnknownService(_) => 11,
            RegistryError::CorruptRegistry { .. } => 12,
            RegistryError::MissingTemplate(_)
            | RegistryError::InvalidTemplate { .. }
            | RegistryError::InvalidIdentifier(_) => 13,
            RegistryError::RangeConflict { .. } => 14,
            RegistryError::EntryPendingRemoval(_) => 15,
            RegistryError::RegistryNotFound(_) => 16,
            RegistryError::InvalidStatus(_) | RegistryError::InvalidPurpose(_) => 2,
            RegistryError::Io(_) | RegistryError::Yaml(_) | RegistryError::Json(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
