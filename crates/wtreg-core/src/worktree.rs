use crate::document::{RegistryDocument, WorktreeEntry};
use crate::error::{RegistryError, Result};
use crate::paths;
use crate::registry::Registry;
use crate::types::{Purpose, Status};
use chrono::Utc;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub purpose: Purpose,
    /// Fills the `{issue}` / `{name}` placeholders of the purpose template.
    pub identifier: String,
    pub branch: String,
    /// Tracker reference; defaults to the identifier for `{issue}` templates.
    pub issue: Option<String>,
    /// One port is reserved per listed service, in order.
    pub services: Vec<String>,
}

impl CreateRequest {
    pub fn new(purpose: Purpose, identifier: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            purpose,
            identifier: identifier.into(),
            branch: branch.into(),
            issue: None,
            services: Vec::new(),
        }
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issue = Some(issue.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub purpose: Option<Purpose>,
    pub issue: Option<String>,
    pub status: Option<Status>,
    /// `Some(true)` keeps entries with ports, `Some(false)` those without.
    pub has_ports: Option<bool>,
}

impl Filter {
    pub fn matches(&self, entry: &WorktreeEntry) -> bool {
        self.purpose.map_or(true, |p| entry.purpose.purpose() == p)
            && self
                .issue
                .as_deref()
                .map_or(true, |i| entry.issue.as_deref() == Some(i))
            && self.status.map_or(true, |s| entry.status == s)
            && self
                .has_ports
                .map_or(true, |want| !entry.port_allocations.is_empty() == want)
    }
}

/// What a removal did with the entry's ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub id: String,
    pub released: Vec<u16>,
    /// Ports listed on the entry that had no allocation record. The entry
    /// is removed regardless.
    pub unreleased: Vec<u16>,
}

// ---------------------------------------------------------------------------
// In-memory operations
// ---------------------------------------------------------------------------

impl RegistryDocument {
    pub fn update_status(&mut self, id: &str, next: Status) -> Result<Status> {
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let prev = entry.status;
        if !prev.can_transition_to(next) {
            return Err(RegistryError::InvalidStatusTransition {
                id: id.to_string(),
                from: prev.to_string(),
                to: next.to_string(),
            });
        }
        entry.status = next;
        Ok(prev)
    }

    /// Delete `id` after releasing its ports. Release is best effort: a port
    /// without a record is noted and skipped.
    pub fn remove_entry(&mut self, id: &str, force: bool) -> Result<Removal> {
        let entry = self
            .entry(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if entry.status == Status::Locked && !force {
            return Err(RegistryError::EntryLocked(id.to_string()));
        }

        let mut removal = Removal {
            id: id.to_string(),
            ..Removal::default()
        };
        for port in entry.port_allocations.clone() {
            if self.release_owned_port(port, id) {
                removal.released.push(port);
            } else {
                removal.unreleased.push(port);
            }
        }
        // Records the entry never listed still go with it.
        let stray: Vec<u16> = self.allocations_for(id).map(|a| a.port).collect();
        for port in stray {
            if self.release_owned_port(port, id) {
                removal.released.push(port);
            }
        }

        self.worktrees.retain(|e| e.id != id);
        Ok(removal)
    }

    /// Entries matching `filter`, in insertion order.
    pub fn query(&self, filter: &Filter) -> Vec<&WorktreeEntry> {
        self.worktrees.iter().filter(|e| filter.matches(e)).collect()
    }

    /// First entry recorded for `issue`.
    pub fn find_by_issue(&self, issue: &str) -> Option<&WorktreeEntry> {
        self.worktrees
            .iter()
            .find(|e| e.issue.as_deref() == Some(issue))
    }
}

// ---------------------------------------------------------------------------
// Persisted operations
// ---------------------------------------------------------------------------

impl Registry {
    /// Register a new worktree and reserve its ports. Nothing is kept if any
    /// step fails, so a worktree is never left half-provisioned.
    pub fn create(&mut self, request: &CreateRequest) -> Result<WorktreeEntry> {
        let rendered = self
            .document()
            .naming_templates
            .render(request.purpose, &request.identifier)?;
        let id = rendered.name.clone();
        let path = rendered.name;

        if self.document().entry(&id).is_some() {
            return Err(RegistryError::DuplicateId(id));
        }
        if let Some(other) = self.document().worktrees.iter().find(|e| e.path == path) {
            return Err(RegistryError::PathConflict {
                path,
                reason: format!("already registered to '{}'", other.id),
            });
        }
        paths::check_worktree_path(self.root(), &self.config().worktree_base, &path)?;

        let issue = request
            .issue
            .clone()
            .or_else(|| rendered.uses_issue.then(|| request.identifier.clone()));
        let now = Utc::now();
        let entry = WorktreeEntry {
            id: id.clone(),
            path,
            branch: request.branch.clone(),
            purpose: request.purpose.into(),
            issue,
            created_at: now,
            port_allocations: Vec::new(),
            status: Status::Active,
        };

        let created = self.transact(|doc| {
            doc.worktrees.push(entry);
            for service in &request.services {
                doc.allocate_port(service, &id, &format!("{service} for {id}"), now)?;
            }
            doc.entry(&id)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(id.clone()))
        })?;

        tracing::info!(
            id = %created.id,
            ports = ?created.port_allocations,
            "worktree registered"
        );
        Ok(created)
    }

    pub fn update_status(&mut self, id: &str, status: Status) -> Result<WorktreeEntry> {
        let prev = self.transact(|doc| doc.update_status(id, status))?;
        tracing::info!(id, from = %prev, to = %status, "status changed");
        self.get(id)
    }

    pub fn remove(&mut self, id: &str, force: bool) -> Result<Removal> {
        let removal = self.transact(|doc| doc.remove_entry(id, force))?;
        if !removal.unreleased.is_empty() {
            tracing::warn!(
                id,
                ports = ?removal.unreleased,
                "ports listed on the worktree had no allocation record"
            );
        }
        tracing::info!(id, released = ?removal.released, "worktree removed");
        Ok(removal)
    }

    pub fn get(&self, id: &str) -> Result<WorktreeEntry> {
        self.document()
            .entry(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn query(&self, filter: &Filter) -> Vec<WorktreeEntry> {
        self.document()
            .query(filter)
            .into_iter()
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
