//! Deterministic slot allocation within a backend's address space
//!
//! A slot is the final octet of a peer address inside the backend's /24
//! subnet. Derivation is stable across restarts (SHA-256, not a
//! process-seeded hasher) and collisions probe forward instead of
//! silently reusing an occupied slot.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::{VpnctlError, VpnctlResult};

/// How a backend picks the starting slot for a new client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStrategy {
    /// Derive from a hash of the client id, probe forward on collision
    Hashed,
    /// Lowest free slot wins
    Sequential,
}

/// Bounded window of allocatable slots for one backend
#[derive(Debug, Clone)]
pub struct SlotSpace {
    protocol: String,
    base: u32,
    capacity: u32,
    strategy: SlotStrategy,
}

impl SlotSpace {
    /// `base + capacity` must stay within the /24 host range
    pub fn new(protocol: &str, base: u32, capacity: u32, strategy: SlotStrategy) -> Self {
        debug_assert!(capacity > 0);
        debug_assert!(base + capacity <= 255);
        Self {
            protocol: protocol.to_string(),
            base,
            capacity,
            strategy,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Pick a free slot for `client_id`, never touching occupied ones
    ///
    /// Deterministic: the same client id against the same occupied set
    /// always yields the same slot. Callers resolve repeat requests via
    /// their registry before allocating, so an occupied derived slot
    /// here always means a different client owns it.
    pub fn allocate(&self, client_id: &str, occupied: &BTreeSet<u32>) -> VpnctlResult<u32> {
        match self.strategy {
            SlotStrategy::Hashed => {
                let start = self.derive(client_id);
                for offset in 0..self.capacity {
                    let slot = self.base + (start - self.base + offset) % self.capacity;
                    if !occupied.contains(&slot) {
                        return Ok(slot);
                    }
                }
                Err(self.exhausted())
            }
            SlotStrategy::Sequential => (self.base..self.base + self.capacity)
                .find(|slot| !occupied.contains(slot))
                .ok_or_else(|| self.exhausted()),
        }
    }

    /// Hash the client id into the slot window
    fn derive(&self, client_id: &str) -> u32 {
        let digest = Sha256::digest(client_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let value = u64::from_be_bytes(prefix);
        self.base + (value % u64::from(self.capacity)) as u32
    }

    fn exhausted(&self) -> VpnctlError {
        VpnctlError::AllocationExhausted {
            protocol: self.protocol.clone(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupied(slots: &[u32]) -> BTreeSet<u32> {
        slots.iter().copied().collect()
    }

    #[test]
    fn test_hashed_allocation_is_deterministic() {
        let space = SlotSpace::new("WireGuard", 10, 240, SlotStrategy::Hashed);
        let empty = BTreeSet::new();

        let a = space.allocate("alice", &empty).expect("allocate failed");
        let b = space.allocate("alice", &empty).expect("allocate failed");
        assert_eq!(a, b);
        assert!((10..250).contains(&a));
    }

    #[test]
    fn test_hashed_collision_probes_forward() {
        let space = SlotSpace::new("WireGuard", 10, 240, SlotStrategy::Hashed);
        let derived = space.allocate("alice", &BTreeSet::new()).expect("allocate failed");

        // Another client already holds the derived slot
        let slot = space.allocate("alice", &occupied(&[derived])).expect("allocate failed");
        assert_ne!(slot, derived);
        assert!((10..250).contains(&slot));
    }

    #[test]
    fn test_hashed_probe_wraps_around() {
        let space = SlotSpace::new("test", 10, 3, SlotStrategy::Hashed);

        // Whatever the derived start, with two of three slots taken the
        // probe must land on the single free one
        for free in 10..13 {
            let taken: Vec<u32> = (10..13).filter(|s| *s != free).collect();
            let slot = space.allocate("alice", &occupied(&taken)).expect("allocate failed");
            assert_eq!(slot, free);
        }
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let space = SlotSpace::new("test", 10, 3, SlotStrategy::Hashed);
        let result = space.allocate("alice", &occupied(&[10, 11, 12]));

        match result {
            Err(VpnctlError::AllocationExhausted { protocol, capacity }) => {
                assert_eq!(protocol, "test");
                assert_eq!(capacity, 3);
            }
            other => panic!("expected AllocationExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_sequential_takes_lowest_free() {
        let space = SlotSpace::new("OpenVPN", 2, 252, SlotStrategy::Sequential);

        assert_eq!(space.allocate("alice", &BTreeSet::new()).expect("allocate failed"), 2);
        assert_eq!(space.allocate("bob", &occupied(&[2])).expect("allocate failed"), 3);
        assert_eq!(space.allocate("carol", &occupied(&[2, 4])).expect("allocate failed"), 3);
    }

    #[test]
    fn test_sequential_exhaustion() {
        let space = SlotSpace::new("OpenVPN", 2, 2, SlotStrategy::Sequential);
        assert!(space.allocate("alice", &occupied(&[2, 3])).is_err());
    }
}
