//! Peer registry, the authoritative record of enrolled clients
//!
//! On-disk server definitions are projections of this registry, rewritten
//! wholesale after every mutation. Records are immutable once enrolled:
//! repeat enrollments return the stored record untouched. The registry
//! snapshots to JSON and restores at backend construction, so enrollments
//! made by one process bind slot allocation in the next.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::keys::KeyMaterial;
use crate::proto::identity::SlotSpace;

/// One enrolled client: id, allocated slot, issued key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub client_id: String,
    pub slot: u32,
    pub keys: KeyMaterial,
}

/// Registry of peer records keyed by client id
///
/// Iteration order is client-id sorted, so projections rendered from the
/// registry are stable across runs.
#[derive(Debug)]
pub struct PeerRegistry {
    space: SlotSpace,
    records: BTreeMap<String, PeerRecord>,
    occupied: BTreeSet<u32>,
}

impl PeerRegistry {
    pub fn new(space: SlotSpace) -> Self {
        Self {
            space,
            records: BTreeMap::new(),
            occupied: BTreeSet::new(),
        }
    }

    /// Serialize every record for persistence, in client-id order
    pub fn snapshot(&self) -> crate::error::VpnctlResult<String> {
        let records: Vec<&PeerRecord> = self.records.values().collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Rebuild a registry from a persisted snapshot
    ///
    /// Restored records seed the occupied set, so no later allocation can
    /// collide with a slot handed out by an earlier process.
    pub fn restore(space: SlotSpace, snapshot: &str) -> crate::error::VpnctlResult<Self> {
        let records: Vec<PeerRecord> = serde_json::from_str(snapshot)?;
        let mut registry = Self::new(space);
        for record in records {
            registry.occupied.insert(record.slot);
            registry.records.insert(record.client_id.clone(), record);
        }
        Ok(registry)
    }

    /// Enroll `client_id`, issuing key material only for first-time clients
    ///
    /// Existing records win: `issue` is not called and no slot moves. On
    /// allocation failure the registry is left exactly as it was.
    pub fn enroll_with(
        &mut self,
        client_id: &str,
        issue: impl FnOnce() -> KeyMaterial,
    ) -> crate::error::VpnctlResult<PeerRecord> {
        if let Some(existing) = self.records.get(client_id) {
            return Ok(existing.clone());
        }

        let slot = self.space.allocate(client_id, &self.occupied)?;
        let record = PeerRecord {
            client_id: client_id.to_string(),
            slot,
            keys: issue(),
        };
        self.occupied.insert(slot);
        self.records.insert(client_id.to_string(), record.clone());
        Ok(record)
    }

    pub fn get(&self, client_id: &str) -> Option<&PeerRecord> {
        self.records.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.records.contains_key(client_id)
    }

    /// Records in client-id order
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
