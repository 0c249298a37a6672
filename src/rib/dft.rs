// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Directory Forwarding Table (DFT): application name -> hosting address.
//!
//! Grounded in `dft_default` from the reference implementation
//! (`uipcp-normal-appl-reg.cpp`): a multimap keyed by application name,
//! permitting several replica entries (one per hosting address) per name,
//! with timestamp as the sole conflict-resolution key for a given
//! (name, address) slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RibError;

/// One DFT replica: `appl_name` resolves to `address`. `local_flag` is set
/// iff this IPCP installed the entry via a local app-register request;
/// only the owning IPCP ages such entries out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DftEntry {
    pub appl_name: String,
    pub address: u64,
    pub timestamp: u64,
    pub local_flag: bool,
}

/// A batch of DFT entries as carried by an M_CREATE/M_DELETE nested object.
pub type DftSlice = Vec<DftEntry>;

#[derive(Debug, Default)]
pub struct Dft {
    // name -> replicas, one per distinct address.
    table: HashMap<String, Vec<DftEntry>>,
}

impl Dft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks one resolving address for `name`, if any replica exists.
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.table.get(name).and_then(|v| v.first()).map(|e| e.address)
    }

    pub fn all_for(&self, name: &str) -> Vec<DftEntry> {
        self.table.get(name).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> Vec<DftEntry> {
        self.table.values().flatten().cloned().collect()
    }

    fn find_local_index(&self, name: &str, local_address: u64) -> Option<usize> {
        self.table
            .get(name)
            .and_then(|v| v.iter().position(|e| e.address == local_address))
    }

    /// Local app-register. Fails if this IPCP already has an entry for
    /// `name` (collision is only checked against entries whose address is
    /// our own — remote replicas for the same name are fine).
    pub fn register_local(
        &mut self,
        name: &str,
        local_address: u64,
        timestamp: u64,
    ) -> Result<DftEntry, RibError> {
        if self.find_local_index(name, local_address).is_some() {
            return Err(RibError::AlreadyExists(name.to_string()));
        }
        let entry = DftEntry {
            appl_name: name.to_string(),
            address: local_address,
            timestamp,
            local_flag: true,
        };
        self.table
            .entry(name.to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    /// Local app-unregister. Fails if no local entry exists.
    pub fn unregister_local(
        &mut self,
        name: &str,
        local_address: u64,
    ) -> Result<DftEntry, RibError> {
        let idx = self
            .find_local_index(name, local_address)
            .ok_or_else(|| RibError::NotFound(name.to_string()))?;
        let replicas = self.table.get_mut(name).unwrap();
        let entry = replicas.remove(idx);
        if replicas.is_empty() {
            self.table.remove(name);
        }
        Ok(entry)
    }

    /// Applies a remote add slice, returning the sub-slice that was
    /// actually accepted (for propagation) and any entries that were
    /// displaced by a fresher timestamp at the same (name, address) slot
    /// (these must be propagated as an M_DELETE, §4.4).
    pub fn apply_add_slice(&mut self, slice: &DftSlice) -> (DftSlice, DftSlice) {
        let mut accepted = Vec::new();
        let mut displaced = Vec::new();
        for incoming in slice {
            let replicas = self.table.entry(incoming.appl_name.clone()).or_default();
            if let Some(pos) = replicas
                .iter()
                .position(|e| e.address == incoming.address)
            {
                if incoming.timestamp > replicas[pos].timestamp {
                    displaced.push(replicas[pos].clone());
                    replicas[pos] = incoming.clone();
                    accepted.push(incoming.clone());
                }
                // older-or-equal timestamp: invariant 4, state unchanged.
            } else {
                replicas.push(incoming.clone());
                accepted.push(incoming.clone());
            }
        }
        (accepted, displaced)
    }

    /// Applies a remote delete slice, returning the sub-slice actually
    /// removed.
    pub fn apply_delete_slice(&mut self, slice: &DftSlice) -> DftSlice {
        let mut removed = Vec::new();
        for incoming in slice {
            if let Some(replicas) = self.table.get_mut(&incoming.appl_name) {
                if let Some(pos) = replicas.iter().position(|e| e.address == incoming.address) {
                    removed.push(replicas.remove(pos));
                }
                if replicas.is_empty() {
                    self.table.remove(&incoming.appl_name);
                }
            }
        }
        removed
    }

    /// Rewrites every local-flagged entry to `new_address` with a fresh
    /// timestamp (§4.4 `set_address`), returning the updated entries for
    /// dissemination.
    pub fn update_local_address(&mut self, new_address: u64, timestamp: u64) -> DftSlice {
        let mut updated = Vec::new();
        for replicas in self.table.values_mut() {
            for e in replicas.iter_mut() {
                if e.local_flag {
                    e.address = new_address;
                    e.timestamp = timestamp;
                    updated.push(e.clone());
                }
            }
        }
        updated
    }

    pub fn len(&self) -> usize {
        self.table.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_local_rejects_second_local_registration() {
        let mut dft = Dft::new();
        dft.register_local("foo/1", 100, 1).unwrap();
        let err = dft.register_local("foo/1", 100, 2).unwrap_err();
        assert!(matches!(err, RibError::AlreadyExists(_)));
    }

    #[test]
    fn remote_registration_for_same_name_different_address_is_allowed() {
        let mut dft = Dft::new();
        dft.register_local("foo/1", 100, 1).unwrap();
        let slice = vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 200,
            timestamp: 5,
            local_flag: false,
        }];
        let (accepted, displaced) = dft.apply_add_slice(&slice);
        assert_eq!(accepted.len(), 1);
        assert!(displaced.is_empty());
        assert_eq!(dft.all_for("foo/1").len(), 2);
    }

    #[test]
    fn older_timestamp_add_is_rejected_and_state_unchanged() {
        // §8 invariant 4.
        let mut dft = Dft::new();
        dft.apply_add_slice(&vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 200,
            timestamp: 10,
            local_flag: false,
        }]);
        let (accepted, displaced) = dft.apply_add_slice(&vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 200,
            timestamp: 5,
            local_flag: false,
        }]);
        assert!(accepted.is_empty());
        assert!(displaced.is_empty());
        assert_eq!(dft.lookup("foo/1"), Some(200));
        assert_eq!(dft.all_for("foo/1")[0].timestamp, 10);
    }

    #[test]
    fn newer_timestamp_displaces_existing_replica() {
        let mut dft = Dft::new();
        dft.apply_add_slice(&vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 200,
            timestamp: 5,
            local_flag: false,
        }]);
        let (accepted, displaced) = dft.apply_add_slice(&vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 200,
            timestamp: 10,
            local_flag: false,
        }]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(displaced.len(), 1);
        assert_eq!(dft.all_for("foo/1")[0].timestamp, 10);
    }

    #[test]
    fn set_address_rewrites_only_local_entries() {
        let mut dft = Dft::new();
        dft.register_local("foo/1", 100, 1).unwrap();
        dft.apply_add_slice(&vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 200,
            timestamp: 2,
            local_flag: false,
        }]);
        let updated = dft.update_local_address(150, 99);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].address, 150);
        assert_eq!(updated[0].timestamp, 99);
        let remote = dft
            .all_for("foo/1")
            .into_iter()
            .find(|e| !e.local_flag)
            .unwrap();
        assert_eq!(remote.address, 200);
    }

    #[test]
    fn unregister_local_fails_when_absent() {
        let mut dft = Dft::new();
        assert!(dft.unregister_local("foo/1", 100).is_err());
    }
}
