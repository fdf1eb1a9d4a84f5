use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Purpose
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Review,
    Feature,
    Bugfix,
    Hotfix,
    Experiment,
    Refactor,
    Docs,
    Test,
}

impl Purpose {
    pub fn all() -> &'static [Purpose] {
        &[
            Purpose::Review,
            Purpose::Feature,
            Purpose::Bugfix,
            Purpose::Hotfix,
            Purpose::Experiment,
            Purpose::Refactor,
            Purpose::Docs,
            Purpose::Test,
        ]
    }

    /// Used when a worktree's purpose cannot be inferred from its name.
    pub fn catch_all() -> Purpose {
        Purpose::Experiment
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Review => "review",
            Purpose::Feature => "feature",
            Purpose::Bugfix => "bugfix",
            Purpose::Hotfix => "hotfix",
            Purpose::Experiment => "experiment",
            Purpose::Refactor => "refactor",
            Purpose::Docs => "docs",
            Purpose::Test => "test",
        }
    }

    /// Short names seen on hand-made worktree directories.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Purpose::Review => &["review", "pr"],
            Purpose::Feature => &["feature", "feat"],
            Purpose::Bugfix => &["bugfix", "fix", "bug"],
            Purpose::Hotfix => &["hotfix"],
            Purpose::Experiment => &["experiment", "exp", "spike"],
            Purpose::Refactor => &["refactor"],
            Purpose::Docs => &["docs", "doc"],
            Purpose::Test => &["test", "tests"],
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Purpose {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Purpose::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| RegistryError::InvalidPurpose(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// AssignedPurpose
// ---------------------------------------------------------------------------

/// A purpose together with how much it can be trusted. Entries created by a
/// caller carry an explicit purpose; entries synthesized during repair carry a
/// guess derived from the directory name.
///
/// On disk an explicit purpose is the bare string (`"review"`), an inferred
/// one is `{"inferred": "review"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssignedPurpose {
    Explicit(Purpose),
    Inferred { inferred: Purpose },
}

impl AssignedPurpose {
    pub fn purpose(self) -> Purpose {
        match self {
            AssignedPurpose::Explicit(p) => p,
            AssignedPurpose::Inferred { inferred } => inferred,
        }
    }

    pub fn is_inferred(self) -> bool {
        matches!(self, AssignedPurpose::Inferred { .. })
    }
}

impl From<Purpose> for AssignedPurpose {
    fn from(p: Purpose) -> Self {
        AssignedPurpose::Explicit(p)
    }
}

impl fmt::Display for AssignedPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignedPurpose::Explicit(p) => write!(f, "{p}"),
            AssignedPurpose::Inferred { inferred } => write!(f, "{inferred}?"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Active,
    Locked,
    PendingRemoval,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Locked => "locked",
            Status::PendingRemoval => "pending-removal",
        }
    }

    /// The status machine: `active <-> locked`, either of them to
    /// `pending-removal`, nothing out of `pending-removal`.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Active, Status::Locked)
                | (Status::Locked, Status::Active)
                | (Status::Active, Status::PendingRemoval)
                | (Status::Locked, Status::PendingRemoval)
        )
    }

    /// Whether ports held by an entry in this status block new allocations.
    pub fn holds_ports(self) -> bool {
        !matches!(self, Status::PendingRemoval)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Status::Active),
            "locked" => Ok(Status::Locked),
            "pending-removal" | "pending_removal" => Ok(Status::PendingRemoval),
            _ => Err(RegistryError::InvalidStatus(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn pending_removal_is_terminal() {
        for next in [Status::Active, Status::Locked, Status::PendingRemoval] {
            assert!(!Status::PendingRemoval.can_transition_to(next));
        }
    }

    #[test]
    fn lock_cycle_allowed() {
        assert!(Status::Active.can_transition_to(Status::Locked));
        assert!(Status::Locked.can_transition_to(Status::Active));
        assert!(!Status::Active.can_transition_to(Status::Active));
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&Status::PendingRemoval).unwrap();
        assert_eq!(json, "\"pending-removal\"");
        assert_eq!(Status::from_str("pending-removal").unwrap(), Status::PendingRemoval);
    }

    #[test]
    fn assigned_purpose_wire_forms() {
        let explicit: AssignedPurpose = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(explicit, AssignedPurpose::Explicit(Purpose::Review));

        let inferred: AssignedPurpose =
            serde_json::from_str(r#"{"inferred":"bugfix"}"#).unwrap();
        assert!(inferred.is_inferred());
        assert_eq!(inferred.purpose(), Purpose::Bugfix);
        assert_eq!(
            serde_json::to_string(&inferred).unwrap(),
            r#"{"inferred":"bugfix"}"#
        );
    }

    #[test]
    fn unknown_purpose_rejected() {
        assert!(matches!(
            Purpose::from_str("chore"),
            Err(RegistryError::InvalidPurpose(_))
        ));
    }
}
