use crate::document::RegistryDocument;
use crate::error::{RegistryError, Result};
use crate::probe::PortProbe;
use crate::registry::Registry;
use crate::types::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// PortRange / PortRangeTable
// ---------------------------------------------------------------------------

/// Inclusive port interval, stored on disk as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> std::result::Result<Self, String> {
        if start == 0 {
            return Err("port 0 is not allocatable".to_string());
        }
        if start > end {
            return Err(format!("start {start} is greater than end {end}"));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

impl TryFrom<(u16, u16)> for PortRange {
    type Error = String;

    fn try_from((start, end): (u16, u16)) -> std::result::Result<Self, Self::Error> {
        PortRange::new(start, end)
    }
}

impl From<PortRange> for (u16, u16) {
    fn from(r: PortRange) -> Self {
        (r.start, r.end)
    }
}

/// Service category to port range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortRangeTable(BTreeMap<String, PortRange>);

impl Default for PortRangeTable {
    fn default() -> Self {
        let defaults = [
            ("web", 3000, 3099),
            ("api", 8000, 8099),
            ("database", 5432, 5531),
            ("cache", 6379, 6478),
            ("testing", 9000, 9099),
            ("debug", 9229, 9328),
        ];
        Self(
            defaults
                .into_iter()
                .map(|(name, start, end)| (name.to_string(), PortRange { start, end }))
                .collect(),
        )
    }
}

impl PortRangeTable {
    pub fn get(&self, service: &str) -> Option<PortRange> {
        self.0.get(service).copied()
    }

    pub fn range(&self, service: &str) -> Result<PortRange> {
        self.get(service)
            .ok_or_else(|| RegistryError::UnknownService(service.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PortRange)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn insert(&mut self, service: &str, range: PortRange) {
        self.0.insert(service.to_string(), range);
    }
}

// ---------------------------------------------------------------------------
// PortAllocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub port: u16,
    pub service: String,
    pub owner: String,
    #[serde(default)]
    pub description: String,
    pub allocated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Allocation over an in-memory document
// ---------------------------------------------------------------------------

impl RegistryDocument {
    /// First free port of `service`'s range, scanning upward from `start`.
    ///
    /// Ports held by entries in `pending-removal` count as free; a new
    /// worktree may take them before the old one is gone.
    pub fn find_next_port(&self, service: &str) -> Result<u16> {
        let range = self.port_ranges.range(service)?;
        let occupied = self.occupied_ports();
        (range.start..=range.end)
            .find(|p| !occupied.contains(p))
            .ok_or_else(|| RegistryError::RangeExhausted {
                service: service.to_string(),
                start: range.start,
                end: range.end,
            })
    }

    /// Reserve the next free port of `service` for `owner`.
    pub fn allocate_port(
        &mut self,
        service: &str,
        owner: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<u16> {
        let range = self.port_ranges.range(service)?;
        let status = self
            .entry(owner)
            .map(|e| e.status)
            .ok_or_else(|| RegistryError::NotFound(owner.to_string()))?;
        if status == Status::PendingRemoval {
            return Err(RegistryError::EntryPendingRemoval(owner.to_string()));
        }

        let port = self.find_next_port(service)?;
        debug_assert!(range.contains(port));

        self.port_allocations.push(PortAllocation {
            port,
            service: service.to_string(),
            owner: owner.to_string(),
            description: description.to_string(),
            allocated_at: now,
        });
        if let Some(entry) = self.entry_mut(owner) {
            if !entry.port_allocations.contains(&port) {
                entry.port_allocations.push(port);
            }
        }
        Ok(port)
    }

    /// Drop every record that currently holds `port` and the matching
    /// back-references. When a live allocation holds the port only that one
    /// is dropped; records left behind by `pending-removal` entries are
    /// dropped only when nothing live holds the port.
    pub fn release_port(&mut self, port: u16) -> Vec<PortAllocation> {
        let live_owner: Option<String> = self
            .port_allocations
            .iter()
            .find(|a| a.port == port && self.allocation_is_live(a))
            .map(|a| a.owner.clone());

        let (released, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.port_allocations)
                .into_iter()
                .partition(|a| {
                    a.port == port && live_owner.as_ref().map_or(true, |o| &a.owner == o)
                });
        self.port_allocations = kept;

        for alloc in &released {
            self.drop_back_reference(&alloc.owner, port);
        }
        released
    }

    /// Drop `owner`'s reservation of `port`. Returns false when `owner` held
    /// no record for it.
    pub fn release_owned_port(&mut self, port: u16, owner: &str) -> bool {
        let before = self.port_allocations.len();
        self.port_allocations
            .retain(|a| !(a.port == port && a.owner == owner));
        self.drop_back_reference(owner, port);
        self.port_allocations.len() != before
    }

    pub(crate) fn drop_back_reference(&mut self, owner: &str, port: u16) {
        if let Some(entry) = self.entry_mut(owner) {
            entry.port_allocations.retain(|p| *p != port);
        }
    }

    /// Whether some live allocation holds `port`.
    pub fn is_port_reserved(&self, port: u16) -> bool {
        self.port_allocations
            .iter()
            .any(|a| a.port == port && self.allocation_is_live(a))
    }

    /// Replace (or add) the range for `service`. Refuses to leave a live
    /// allocation of that service outside the new range.
    pub fn set_port_range(&mut self, service: &str, start: u16, end: u16) -> Result<()> {
        let range = PortRange::new(start, end).map_err(|reason| RegistryError::RangeConflict {
            service: service.to_string(),
            reason,
        })?;

        let stranded: Vec<String> = self
            .port_allocations
            .iter()
            .filter(|a| a.service == service && self.allocation_is_live(a) && !range.contains(a.port))
            .map(|a| format!("{} ({})", a.port, a.owner))
            .collect();
        if !stranded.is_empty() {
            return Err(RegistryError::RangeConflict {
                service: service.to_string(),
                reason: format!("live allocations outside {start}-{end}: {}", stranded.join(", ")),
            });
        }

        self.port_ranges.insert(service, range);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persisted operations
// ---------------------------------------------------------------------------

impl Registry {
    /// Reserve the lowest free port of `service` for `owner` and persist it.
    pub fn allocate(&mut self, service: &str, owner: &str, description: &str) -> Result<u16> {
        let port = self.transact(|doc| doc.allocate_port(service, owner, description, Utc::now()))?;
        tracing::debug!(service, owner, port, "allocated port");
        Ok(port)
    }

    /// Release `port`. Returns false when nothing held it.
    pub fn release(&mut self, port: u16) -> Result<bool> {
        if !self.document().port_allocations.iter().any(|a| a.port == port) {
            return Ok(false);
        }
        let released = self.transact(|doc| Ok(doc.release_port(port)))?;
        for alloc in &released {
            tracing::debug!(port, owner = %alloc.owner, "released port");
        }
        Ok(!released.is_empty())
    }

    /// Read-only preview of what [`Registry::allocate`] would return.
    pub fn find_next(&self, service: &str) -> Result<u16> {
        self.document().find_next_port(service)
    }

    /// Whether `port` is free in the registry and bindable on this host.
    /// Port 0 is never available.
    pub fn is_available(&self, port: u16, probe: &dyn PortProbe) -> bool {
        port != 0 && !self.document().is_port_reserved(port) && probe.can_bind(port)
    }

    /// Explicit reconfiguration of a service range.
    pub fn set_range(&mut self, service: &str, start: u16, end: u16) -> Result<()> {
        self.transact(|doc| doc.set_port_range(service, start, end))?;
        tracing::info!(service, start, end, "port range updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
