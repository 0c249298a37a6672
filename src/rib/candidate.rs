// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Neighbour-Candidate set: peers we could reach if a common lower DIF
//! exists, gossipped via the `Neighbors` RIB object (§4.4
//! `neighbors_handler`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::name::Name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborCandidate {
    pub name: Name,
    pub address: u64,
    pub lower_difs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct NeighborCandidateSet {
    candidates: HashMap<String, NeighborCandidate>,
}

impl NeighborCandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges an incoming batch of candidates. Entries naming `self_name`
    /// are dropped (self-entries are ignored); entries sharing no lower
    /// DIF with `our_lower_difs` are discarded, since they are
    /// unreachable without another layer.
    pub fn merge(
        &mut self,
        incoming: &[NeighborCandidate],
        self_name: &Name,
        our_lower_difs: &[String],
    ) -> Vec<NeighborCandidate> {
        let mut accepted = Vec::new();
        for cand in incoming {
            if &cand.name == self_name {
                continue;
            }
            let reachable = cand
                .lower_difs
                .iter()
                .any(|d| our_lower_difs.iter().any(|o| o == d));
            if !reachable {
                continue;
            }
            self.candidates
                .insert(cand.name.canonical(), cand.clone());
            accepted.push(cand.clone());
        }
        accepted
    }

    pub fn insert(&mut self, candidate: NeighborCandidate) {
        self.candidates
            .insert(candidate.name.canonical(), candidate);
    }

    pub fn contains_address(&self, address: u64) -> bool {
        self.candidates.values().any(|c| c.address == address)
    }

    pub fn all(&self) -> Vec<NeighborCandidate> {
        self.candidates.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_entries_are_ignored() {
        let mut set = NeighborCandidateSet::new();
        let me = Name::new("me");
        let accepted = set.merge(
            &[NeighborCandidate {
                name: me.clone(),
                address: 1,
                lower_difs: vec!["L".into()],
            }],
            &me,
            &["L".into()],
        );
        assert!(accepted.is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn candidates_without_common_lower_dif_are_discarded() {
        let mut set = NeighborCandidateSet::new();
        let accepted = set.merge(
            &[NeighborCandidate {
                name: Name::new("peer"),
                address: 2,
                lower_difs: vec!["OTHER".into()],
            }],
            &Name::new("me"),
            &["L".into()],
        );
        assert!(accepted.is_empty());
    }

    #[test]
    fn reachable_candidates_are_kept() {
        let mut set = NeighborCandidateSet::new();
        let accepted = set.merge(
            &[NeighborCandidate {
                name: Name::new("peer"),
                address: 2,
                lower_difs: vec!["L".into()],
            }],
            &Name::new("me"),
            &["L".into()],
        );
        assert_eq!(accepted.len(), 1);
        assert!(set.contains_address(2));
    }
}
