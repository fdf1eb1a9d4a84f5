use crate::document::{RegistryDocument, WorktreeEntry};
use crate::error::Result;
use crate::paths;
use crate::probe::{WorktreeProbe, WorktreeState};
use crate::registry::Registry;
use crate::types::{AssignedPurpose, Purpose, Status};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedEntry {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MismatchedEntry {
    pub id: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisteredWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortConflict {
    pub port: u16,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortRef {
    pub port: u16,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutOfRange {
    pub port: u16,
    pub owner: String,
    pub service: String,
    pub reason: String,
}

/// Everything that disagrees between the registry and the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Registered, but nothing is on disk.
    pub orphaned: Vec<OrphanedEntry>,
    /// Something is on disk, but not the worktree the entry describes.
    pub mismatched: Vec<MismatchedEntry>,
    /// Worktrees of this repository nobody registered.
    pub unregistered: Vec<UnregisteredWorktree>,
    pub duplicate_ids: Vec<String>,
    pub duplicate_paths: Vec<String>,
    /// Ports held by more than one live allocation.
    pub port_conflicts: Vec<PortConflict>,
    /// Allocations whose owner does not exist.
    pub dangling_allocations: Vec<PortRef>,
    /// Ports listed on an entry without an allocation record.
    pub missing_allocations: Vec<PortRef>,
    /// Allocation records their owner does not list.
    pub missing_back_references: Vec<PortRef>,
    pub out_of_range: Vec<OutOfRange>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.issue_count() == 0
    }

    pub fn issue_count(&self) -> usize {
        self.orphaned.len()
            + self.mismatched.len()
            + self.unregistered.len()
            + self.duplicate_ids.len()
            + self.duplicate_paths.len()
            + self.port_conflicts.len()
            + self.dangling_allocations.len()
            + self.missing_allocations.len()
            + self.missing_back_references.len()
            + self.out_of_range.len()
    }
}

// ---------------------------------------------------------------------------
// Fix outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixAction {
    RemovedOrphan { id: String, released: Vec<u16> },
    Registered { id: String, purpose: AssignedPurpose },
    SkippedUnregistered { path: PathBuf, reason: String },
    ResolvedConflict { port: u16, kept: String, released: Vec<String> },
    DroppedDangling { port: u16, owner: String },
    DroppedMissingAllocation { port: u16, owner: String },
    RestoredBackReference { port: u16, owner: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    /// Copy of the registry taken before anything changed.
    pub backup: PathBuf,
    pub actions: Vec<FixAction>,
    /// Validation after the repair.
    pub report: Report,
}

// ---------------------------------------------------------------------------
// Consistency checks over the document alone
// ---------------------------------------------------------------------------

fn duplicates<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut dups = BTreeSet::new();
    for v in values {
        if !seen.insert(v) {
            dups.insert(v.to_string());
        }
    }
    dups.into_iter().collect()
}

fn port_conflicts(doc: &RegistryDocument) -> Vec<PortConflict> {
    let mut holders: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for alloc in doc.port_allocations.iter().filter(|a| doc.allocation_is_live(a)) {
        holders.entry(alloc.port).or_default().push(alloc.owner.clone());
    }
    holders
        .into_iter()
        .filter(|(_, owners)| owners.len() > 1)
        .map(|(port, owners)| PortConflict { port, owners })
        .collect()
}

fn check_document(doc: &RegistryDocument, report: &mut Report) {
    report.duplicate_ids = duplicates(doc.worktrees.iter().map(|e| e.id.as_str()));
    report.duplicate_paths = duplicates(doc.worktrees.iter().map(|e| e.path.as_str()));
    report.port_conflicts = port_conflicts(doc);

    for alloc in &doc.port_allocations {
        let port_ref = || PortRef {
            port: alloc.port,
            owner: alloc.owner.clone(),
        };
        match doc.entry(&alloc.owner) {
            None => report.dangling_allocations.push(port_ref()),
            Some(owner) if !owner.port_allocations.contains(&alloc.port) => {
                report.missing_back_references.push(port_ref())
            }
            Some(_) => {}
        }

        let reason = match doc.port_ranges.get(&alloc.service) {
            None => Some("unknown service".to_string()),
            Some(r) if !r.contains(alloc.port) => Some(format!("outside {}-{}", r.start, r.end)),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            report.out_of_range.push(OutOfRange {
                port: alloc.port,
                owner: alloc.owner.clone(),
                service: alloc.service.clone(),
                reason,
            });
        }
    }

    for entry in &doc.worktrees {
        for &port in &entry.port_allocations {
            if !doc.allocations_for(&entry.id).any(|a| a.port == port) {
                report.missing_allocations.push(PortRef {
                    port,
                    owner: entry.id.clone(),
                });
            }
        }
    }
}

/// For a `prefix{issue}` template, the issue part of a matching name.
fn infer_issue(doc: &RegistryDocument, purpose: Purpose, name: &str) -> Option<String> {
    let template = doc.naming_templates.get(purpose)?;
    let prefix = template.strip_suffix("{issue}")?;
    if prefix.contains('{') {
        return None;
    }
    name.strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Registry operations
// ---------------------------------------------------------------------------

impl Registry {
    /// Compare the registry with the filesystem. Read-only.
    pub fn validate(&self, probe: &dyn WorktreeProbe) -> Result<Report> {
        let doc = self.document();
        let mut report = Report::default();

        let mut registered = BTreeSet::new();
        for entry in &doc.worktrees {
            let path = self.resolve(&entry.path);
            registered.insert(path.clone());
            match probe.inspect(&path) {
                WorktreeState::Missing => report.orphaned.push(OrphanedEntry {
                    id: entry.id.clone(),
                    path,
                }),
                WorktreeState::NotAWorktree { reason } => {
                    report.mismatched.push(MismatchedEntry {
                        id: entry.id.clone(),
                        path,
                        reason,
                    })
                }
                WorktreeState::Worktree {
                    branch: Some(branch),
                    ..
                } if branch != entry.branch => report.mismatched.push(MismatchedEntry {
                    id: entry.id.clone(),
                    path,
                    reason: format!("checked out '{branch}', registered '{}'", entry.branch),
                }),
                WorktreeState::Worktree { .. } => {}
            }
        }

        for path in probe.discover(&self.worktree_base())? {
            if registered.contains(&path) {
                continue;
            }
            let branch = match probe.inspect(&path) {
                WorktreeState::Worktree { branch, .. } => branch,
                _ => None,
            };
            report.unregistered.push(UnregisteredWorktree { path, branch });
        }

        check_document(doc, &mut report);
        Ok(report)
    }

    /// Repair what [`Registry::validate`] finds. A backup is always written
    /// before the registry changes; mismatched entries, duplicates and
    /// out-of-range allocations are left for the operator.
    pub fn fix(&mut self, probe: &dyn WorktreeProbe) -> Result<FixOutcome> {
        let found = self.validate(probe)?;
        let backup = self.backup()?;

        let actions = if found.is_clean() {
            Vec::new()
        } else {
            self.transact(|doc| Ok(apply_fixes(doc, &found)))?
        };
        for action in &actions {
            tracing::info!(?action, "registry repaired");
        }

        let report = self.validate(probe)?;
        Ok(FixOutcome {
            backup,
            actions,
            report,
        })
    }
}

fn apply_fixes(doc: &mut RegistryDocument, found: &Report) -> Vec<FixAction> {
    let mut actions = Vec::new();

    for orphan in &found.orphaned {
        if let Ok(removal) = doc.remove_entry(&orphan.id, true) {
            actions.push(FixAction::RemovedOrphan {
                id: orphan.id.clone(),
                released: removal.released,
            });
        }
    }

    for wt in &found.unregistered {
        let name = wt
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let skip = |reason: &str| FixAction::SkippedUnregistered {
            path: wt.path.clone(),
            reason: reason.to_string(),
        };
        if paths::validate_name(&name).is_err() {
            actions.push(skip("directory name is not a valid id"));
            continue;
        }
        if doc.entry(&name).is_some() || doc.worktrees.iter().any(|e| e.path == name) {
            actions.push(skip("id or path already registered"));
            continue;
        }

        let purpose = doc
            .naming_templates
            .infer(&name)
            .unwrap_or_else(Purpose::catch_all);
        let assigned = AssignedPurpose::Inferred { inferred: purpose };
        let issue = infer_issue(doc, purpose, &name);
        doc.worktrees.push(WorktreeEntry {
            id: name.clone(),
            path: name.clone(),
            branch: wt.branch.clone().unwrap_or_else(|| "HEAD".to_string()),
            purpose: assigned,
            issue,
            created_at: Utc::now(),
            port_allocations: Vec::new(),
            status: Status::Active,
        });
        actions.push(FixAction::Registered {
            id: name,
            purpose: assigned,
        });
    }

    // Recomputed: orphan removal may already have settled some conflicts.
    for conflict in port_conflicts(doc) {
        let mut holders: Vec<usize> = doc
            .port_allocations
            .iter()
            .enumerate()
            .filter(|(_, a)| a.port == conflict.port && doc.allocation_is_live(a))
            .map(|(i, _)| i)
            .collect();
        // Stable: equal timestamps keep registry order.
        holders.sort_by_key(|&i| doc.port_allocations[i].allocated_at);
        let Some((&keep, dropped)) = holders.split_first() else {
            continue;
        };
        let kept = doc.port_allocations[keep].owner.clone();
        let released: Vec<String> = dropped
            .iter()
            .map(|&i| doc.port_allocations[i].owner.clone())
            .collect();

        let mut index = 0;
        doc.port_allocations.retain(|_| {
            let drop = dropped.contains(&index);
            index += 1;
            !drop
        });
        // Owners that still hold a record for the port keep their back-reference.
        for owner in &released {
            if !doc.allocations_for(owner).any(|a| a.port == conflict.port) {
                doc.drop_back_reference(owner, conflict.port);
            }
        }

        actions.push(FixAction::ResolvedConflict {
            port: conflict.port,
            kept,
            released,
        });
    }

    let dangling: Vec<PortRef> = doc
        .port_allocations
        .iter()
        .filter(|a| doc.entry(&a.owner).is_none())
        .map(|a| PortRef {
            port: a.port,
            owner: a.owner.clone(),
        })
        .collect();
    for d in dangling {
        doc.port_allocations
            .retain(|a| !(a.port == d.port && a.owner == d.owner));
        actions.push(FixAction::DroppedDangling {
            port: d.port,
            owner: d.owner,
        });
    }

    let mut missing = Vec::new();
    for entry in &doc.worktrees {
        for &port in &entry.port_allocations {
            if !doc.allocations_for(&entry.id).any(|a| a.port == port) {
                missing.push((port, entry.id.clone()));
            }
        }
    }
    for (port, owner) in missing {
        doc.drop_back_reference(&owner, port);
        actions.push(FixAction::DroppedMissingAllocation { port, owner });
    }

    let unlisted: Vec<(u16, String)> = doc
        .port_allocations
        .iter()
        .filter(|a| {
            doc.entry(&a.owner)
                .is_some_and(|e| !e.port_allocations.contains(&a.port))
        })
        .map(|a| (a.port, a.owner.clone()))
        .collect();
    for (port, owner) in unlisted {
        if let Some(entry) = doc.entry_mut(&owner) {
            entry.port_allocations.push(port);
        }
        actions.push(FixAction::RestoredBackReference { port, owner });
    }

    actions
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ports::PortAllocation;
    use crate::probe::tests::make_worktree;
    use crate::probe::FsProbe;
    use crate::worktree::CreateRequest;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        repo: PathBuf,
        trees: PathBuf,
        reg: Registry,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let repo = tmp.path().join("repo");
            let trees = tmp.path().join("trees");
            std::fs::create_dir_all(repo.join(".git")).unwrap();
            std::fs::create_dir_all(&trees).unwrap();
            let config = Config {
                worktree_base: PathBuf::from("../trees"),
                ..Config::default()
            };
            let reg = Registry::open_or_default_with(&repo, config).unwrap();
            Self {
                _tmp: tmp,
                repo,
                trees,
                reg,
            }
        }

        fn probe(&self) -> FsProbe {
            FsProbe::new(&self.repo)
        }

        /// Register a worktree and put it on disk.
        fn checked_out(&mut self, identifier: &str, services: &[&str]) -> WorktreeEntry {
            let request = CreateRequest::new(Purpose::Review, identifier, "main")
                .with_services(services.iter().copied());
            let entry = self.reg.create(&request).unwrap();
            make_worktree(&self.repo, &self.trees.join(&entry.path), "main");
            entry
        }
    }

    #[test]
    fn clean_registry() {
        let mut fx = Fixture::new();
        fx.checked_out("GH-1", &["web"]);
        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn orphan_is_reported_and_fixed_after_backup() {
        let mut fx = Fixture::new();
        fx.checked_out("GH-1", &[]);
        let orphan = fx
            .reg
            .create(&CreateRequest::new(Purpose::Review, "X", "main").with_services(["web", "api"]))
            .unwrap();

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(report.orphaned.len(), 1);
        assert_eq!(report.orphaned[0].id, orphan.id);

        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.backup.exists());
        let backed_up = std::fs::read_to_string(&outcome.backup).unwrap();
        assert!(backed_up.contains("review-X"));

        assert!(outcome.actions.contains(&FixAction::RemovedOrphan {
            id: "review-X".to_string(),
            released: vec![3000, 8000],
        }));
        assert!(outcome.report.is_clean(), "{:?}", outcome.report);
        assert!(fx.reg.get("review-X").is_err());
        assert!(fx.reg.document().port_allocations.is_empty());
        assert_eq!(fx.reg.find_next("web").unwrap(), 3000);
    }

    #[test]
    fn directory_that_is_not_a_worktree_is_mismatched() {
        let mut fx = Fixture::new();
        let entry = fx
            .reg
            .create(&CreateRequest::new(Purpose::Review, "GH-2", "main"))
            .unwrap();
        std::fs::create_dir_all(fx.trees.join(&entry.path)).unwrap();

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert!(report.orphaned.is_empty());
        assert_eq!(report.mismatched.len(), 1);

        // Reported only; fix leaves it alone.
        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.actions.is_empty());
        assert!(fx.reg.get(&entry.id).is_ok());
    }

    #[test]
    fn branch_mismatch_is_reported() {
        let mut fx = Fixture::new();
        let entry = fx
            .reg
            .create(&CreateRequest::new(Purpose::Review, "GH-3", "pr/3"))
            .unwrap();
        make_worktree(&fx.repo, &fx.trees.join(&entry.path), "something-else");

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(report.mismatched.len(), 1);
        assert!(report.mismatched[0].reason.contains("something-else"));
    }

    #[test]
    fn unregistered_worktrees_are_synthesized() {
        let mut fx = Fixture::new();
        make_worktree(&fx.repo, &fx.trees.join("review-GH-77"), "pr/77");
        make_worktree(&fx.repo, &fx.trees.join("scratchpad"), "tmp");

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(report.unregistered.len(), 2);

        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.report.is_clean(), "{:?}", outcome.report);

        let review = fx.reg.get("review-GH-77").unwrap();
        assert_eq!(review.purpose, AssignedPurpose::Inferred { inferred: Purpose::Review });
        assert_eq!(review.issue.as_deref(), Some("GH-77"));
        assert_eq!(review.branch, "pr/77");
        assert!(review.port_allocations.is_empty());

        let scratch = fx.reg.get("scratchpad").unwrap();
        assert_eq!(scratch.purpose.purpose(), Purpose::catch_all());
        assert!(scratch.purpose.is_inferred());
    }

    #[test]
    fn conflicts_keep_oldest_allocation() {
        let mut fx = Fixture::new();
        let a = fx.checked_out("A", &["web"]);
        let b = fx.checked_out("B", &[]);
        let old = Utc::now() - Duration::hours(1);
        fx.reg
            .transact(|doc| {
                // Hand edit: B claims A's port with an older timestamp.
                doc.port_allocations.push(PortAllocation {
                    port: 3000,
                    service: "web".to_string(),
                    owner: b.id.clone(),
                    description: String::new(),
                    allocated_at: old,
                });
                doc.entry_mut(&b.id).unwrap().port_allocations.push(3000);
                Ok(())
            })
            .unwrap();

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(
            report.port_conflicts,
            vec![PortConflict {
                port: 3000,
                owners: vec![a.id.clone(), b.id.clone()],
            }]
        );

        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.actions.contains(&FixAction::ResolvedConflict {
            port: 3000,
            kept: b.id.clone(),
            released: vec![a.id.clone()],
        }));
        assert!(outcome.report.is_clean(), "{:?}", outcome.report);
        assert!(fx.reg.get(&a.id).unwrap().port_allocations.is_empty());
        assert_eq!(fx.reg.get(&b.id).unwrap().port_allocations, vec![3000]);
    }

    #[test]
    fn duplicate_record_of_same_owner_is_collapsed() {
        let mut fx = Fixture::new();
        let a = fx.checked_out("A", &["web"]);
        fx.reg
            .transact(|doc| {
                let twin = doc.port_allocations[0].clone();
                doc.port_allocations.push(twin);
                Ok(())
            })
            .unwrap();

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(
            report.port_conflicts,
            vec![PortConflict {
                port: 3000,
                owners: vec![a.id.clone(), a.id.clone()],
            }]
        );

        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.actions.contains(&FixAction::ResolvedConflict {
            port: 3000,
            kept: a.id.clone(),
            released: vec![a.id.clone()],
        }));
        assert!(outcome.report.is_clean(), "{:?}", outcome.report);
        assert_eq!(fx.reg.document().port_allocations.len(), 1);
        assert_eq!(fx.reg.get(&a.id).unwrap().port_allocations, vec![3000]);
    }

    #[test]
    fn referential_drift_is_repaired() {
        let mut fx = Fixture::new();
        let a = fx.checked_out("A", &["web", "api"]);
        fx.reg
            .transact(|doc| {
                doc.port_allocations.push(PortAllocation {
                    port: 6379,
                    service: "cache".to_string(),
                    owner: "ghost".to_string(),
                    description: String::new(),
                    allocated_at: Utc::now(),
                });
                let entry = doc.entry_mut(&a.id).unwrap();
                entry.port_allocations.retain(|p| *p != 8000);
                entry.port_allocations.push(3050);
                Ok(())
            })
            .unwrap();

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(report.dangling_allocations.len(), 1);
        assert_eq!(report.missing_back_references[0].port, 8000);
        assert_eq!(report.missing_allocations[0].port, 3050);

        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.report.is_clean(), "{:?}", outcome.report);
        let mut ports = fx.reg.get(&a.id).unwrap().port_allocations;
        ports.sort_unstable();
        assert_eq!(ports, vec![3000, 8000]);
        assert!(fx.reg.document().port_allocations.iter().all(|p| p.owner == a.id));
    }

    #[test]
    fn out_of_range_and_duplicates_are_reported() {
        let mut fx = Fixture::new();
        let a = fx.checked_out("A", &["web"]);
        fx.reg
            .transact(|doc| {
                doc.port_allocations[0].port = 4242;
                doc.entry_mut(&a.id).unwrap().port_allocations = vec![4242];
                let mut twin = doc.worktrees[0].clone();
                twin.port_allocations.clear();
                doc.worktrees.push(twin);
                Ok(())
            })
            .unwrap();

        let report = fx.reg.validate(&fx.probe()).unwrap();
        assert_eq!(report.out_of_range.len(), 1);
        assert_eq!(report.duplicate_ids, vec![a.id.clone()]);
        assert_eq!(report.duplicate_paths, vec![a.path.clone()]);
    }

    #[test]
    fn fix_on_clean_registry_still_backs_up() {
        let mut fx = Fixture::new();
        fx.checked_out("A", &[]);
        let outcome = fx.reg.fix(&fx.probe()).unwrap();
        assert!(outcome.actions.is_empty());
        assert!(outcome.backup.exists());
        assert_eq!(fx.reg.list_backups().unwrap(), vec![outcome.backup]);
    }
}
