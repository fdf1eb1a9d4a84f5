use crate::naming::NamingTemplates;
use crate::ports::{PortAllocation, PortRangeTable};
use crate::types::{AssignedPurpose, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// WorktreeEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeEntry {
    pub id: String,
    /// Relative to the configured worktree base directory.
    pub path: String,
    pub branch: String,
    pub purpose: AssignedPurpose,
    #[serde(default)]
    pub issue: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub port_allocations: Vec<u16>,
    pub status: Status,
}

impl WorktreeEntry {
    pub fn holds_ports(&self) -> bool {
        self.status.holds_ports()
    }
}

// ---------------------------------------------------------------------------
// RegistryDocument
// ---------------------------------------------------------------------------

/// The whole registry as persisted in `.wtreg/registry.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub worktrees: Vec<WorktreeEntry>,
    pub port_allocations: Vec<PortAllocation>,
    pub port_ranges: PortRangeTable,
    pub naming_templates: NamingTemplates,
}

fn default_version() -> u32 {
    1
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: default_version(),
            worktrees: Vec::new(),
            port_allocations: Vec::new(),
            port_ranges: PortRangeTable::default(),
            naming_templates: NamingTemplates::default(),
        }
    }
}

impl RegistryDocument {
    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    /// Parse registry JSON. The error string describes what is wrong with the
    /// document; the store attaches the file path.
    pub fn parse(data: &str) -> std::result::Result<Self, String> {
        let value: Value = serde_json::from_str(data).map_err(|e| format!("invalid JSON: {e}"))?;
        let Value::Object(mut obj) = value else {
            return Err("top level is not an object".to_string());
        };

        for key in ["worktrees", "portRanges", "namingTemplates"] {
            if !obj.contains_key(key) {
                return Err(format!("missing required key '{key}'"));
            }
        }

        if !obj.contains_key("portAllocations") {
            let legacy = obj
                .remove("allocated_ports")
                .ok_or("missing required key 'portAllocations'")?;
            let translated = translate_allocated_ports(legacy)?;
            obj.insert("portAllocations".to_string(), Value::Array(translated));
        }

        serde_json::from_value(Value::Object(obj)).map_err(|e| format!("schema mismatch: {e}"))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut data = serde_json::to_string_pretty(self)?;
        data.push('\n');
        Ok(data)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn entry(&self, id: &str) -> Option<&WorktreeEntry> {
        self.worktrees.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut WorktreeEntry> {
        self.worktrees.iter_mut().find(|e| e.id == id)
    }

    /// Whether an allocation still blocks its port. Allocations whose owner is
    /// gone are treated as occupied until they are repaired.
    pub fn allocation_is_live(&self, alloc: &PortAllocation) -> bool {
        self.entry(&alloc.owner)
            .map_or(true, WorktreeEntry::holds_ports)
    }

    /// Ports no new allocation may take.
    pub fn occupied_ports(&self) -> BTreeSet<u16> {
        self.port_allocations
            .iter()
            .filter(|a| self.allocation_is_live(a))
            .map(|a| a.port)
            .collect()
    }

    pub fn allocations_for<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a PortAllocation> {
        self.port_allocations.iter().filter(move |a| a.owner == owner)
    }
}

/// Older registries kept ports as a map keyed by port number:
/// `{"3000": {"service": "web", "worktree": "review-1"}}`.
fn translate_allocated_ports(legacy: Value) -> std::result::Result<Vec<Value>, String> {
    let Value::Object(map) = legacy else {
        return Err("'allocated_ports' is not an object".to_string());
    };

    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let port: u16 = key
            .parse()
            .map_err(|_| format!("'allocated_ports' key '{key}' is not a port number"))?;
        let Value::Object(fields) = value else {
            return Err(format!("'allocated_ports.{key}' is not an object"));
        };
        let field = |names: &[&str]| -> Option<Value> {
            names.iter().find_map(|n| fields.get(*n).cloned())
        };

        let mut record = Map::new();
        record.insert("port".to_string(), Value::from(port));
        record.insert(
            "service".to_string(),
            field(&["service"]).ok_or_else(|| format!("'allocated_ports.{key}' has no service"))?,
        );
        record.insert(
            "owner".to_string(),
            field(&["owner", "worktree"])
                .ok_or_else(|| format!("'allocated_ports.{key}' has no owner"))?,
        );
        record.insert(
            "description".to_string(),
            field(&["description"]).unwrap_or_else(|| Value::from("")),
        );
        record.insert(
            "allocatedAt".to_string(),
            field(&["allocatedAt", "allocated_at"])
                .unwrap_or_else(|| Value::from(Utc::now().to_rfc3339())),
        );
        out.push(Value::Object(record));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Purpose;

    fn entry(id: &str, status: Status) -> WorktreeEntry {
        WorktreeEntry {
            id: id.to_string(),
            path: id.to_string(),
            branch: "main".to_string(),
            purpose: Purpose::Review.into(),
            issue: None,
            created_at: Utc::now(),
            port_allocations: Vec::new(),
            status,
        }
    }

    #[test]
    fn default_document_roundtrips() {
        let doc = RegistryDocument::default();
        let parsed = RegistryDocument::parse(&doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn serialized_keys_are_camel_case() {
        let mut doc = RegistryDocument::default();
        doc.worktrees.push(entry("review-1", Status::Active));
        let json = doc.to_json().unwrap();
        for key in ["\"portAllocations\"", "\"portRanges\"", "\"namingTemplates\"", "\"createdAt\""] {
            assert!(json.contains(key), "missing {key}");
        }
        assert!(json.contains("\"issue\": null"));
    }

    #[test]
    fn missing_required_key_is_reported() {
        let err = RegistryDocument::parse(r#"{"worktrees": [], "portAllocations": [], "portRanges": {}}"#)
            .unwrap_err();
        assert!(err.contains("namingTemplates"), "{err}");
    }

    #[test]
    fn not_json_is_reported() {
        let err = RegistryDocument::parse("{\"worktrees\": [").unwrap_err();
        assert!(err.starts_with("invalid JSON"), "{err}");
    }

    #[test]
    fn legacy_allocated_ports_map_is_translated() {
        let data = r#"{
            "worktrees": [],
            "allocated_ports": {
                "3001": {"service": "web", "worktree": "review-1"},
                "5432": {"service": "database", "owner": "review-1", "description": "pg"}
            },
            "portRanges": {"web": [3000, 3099], "database": [5432, 5531]},
            "namingTemplates": {"review": "review-{issue}"}
        }"#;
        let doc = RegistryDocument::parse(data).unwrap();
        assert_eq!(doc.port_allocations.len(), 2);
        let web = doc.port_allocations.iter().find(|a| a.port == 3001).unwrap();
        assert_eq!(web.service, "web");
        assert_eq!(web.owner, "review-1");
        let db = doc.port_allocations.iter().find(|a| a.port == 5432).unwrap();
        assert_eq!(db.description, "pg");

        // Written back in the canonical flat form.
        let json = doc.to_json().unwrap();
        assert!(json.contains("portAllocations"));
        assert!(!json.contains("allocated_ports"));
    }

    #[test]
    fn pending_removal_ports_are_not_occupied() {
        let mut doc = RegistryDocument::default();
        doc.worktrees.push(entry("a", Status::Active));
        doc.worktrees.push(entry("b", Status::PendingRemoval));
        for (port, owner) in [(3000, "a"), (3001, "b"), (3002, "ghost")] {
            doc.port_allocations.push(PortAllocation {
                port,
                service: "web".to_string(),
                owner: owner.to_string(),
                description: String::new(),
                allocated_at: Utc::now(),
            });
        }
        let occupied: Vec<u16> = doc.occupied_ports().into_iter().collect();
        assert_eq!(occupied, vec![3000, 3002]);
    }
}
