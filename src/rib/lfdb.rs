// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Lower Flow Database (LFDB): link-state topology of intra-DIF flows.
//!
//! Keyed by (src_address, dst_address). Conflict resolution is
//! sequence-number precedence; at equal sequence number, state breaks the
//! tie (ACTIVE beats FAILED).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LowerFlowState {
    Failed,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowerFlow {
    pub src_address: u64,
    pub dst_address: u64,
    pub cost: u32,
    pub sequence_number: u64,
    pub age: u64,
    pub state: LowerFlowState,
}

pub type LfdbSlice = Vec<LowerFlow>;

#[derive(Debug, Default)]
pub struct Lfdb {
    edges: HashMap<(u64, u64), LowerFlow>,
}

impl Lfdb {
    pub fn new() -> Self {
        Self::default()
    }

    fn wins(incoming: &LowerFlow, existing: &LowerFlow) -> bool {
        match incoming.sequence_number.cmp(&existing.sequence_number) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => incoming.state > existing.state,
            std::cmp::Ordering::Less => false,
        }
    }

    /// Applies an update slice, returning the entries actually accepted
    /// (for propagation).
    pub fn apply_slice(&mut self, slice: &LfdbSlice) -> LfdbSlice {
        let mut accepted = Vec::new();
        for incoming in slice {
            let key = (incoming.src_address, incoming.dst_address);
            let accept = match self.edges.get(&key) {
                Some(existing) => Self::wins(incoming, existing),
                None => true,
            };
            if accept {
                self.edges.insert(key, incoming.clone());
                accepted.push(incoming.clone());
            }
        }
        accepted
    }

    /// Commits the self-edge created when a Neighbor finishes enrolment
    /// (§4.3 transitions 6/7): an ACTIVE edge `local_address <-> peer`.
    pub fn commit_self_edge(
        &mut self,
        local_address: u64,
        peer_address: u64,
        cost: u32,
        sequence_number: u64,
    ) -> LowerFlow {
        let edge = LowerFlow {
            src_address: local_address,
            dst_address: peer_address,
            cost,
            sequence_number,
            age: 0,
            state: LowerFlowState::Active,
        };
        self.edges.insert((local_address, peer_address), edge.clone());
        edge
    }

    /// Removes every edge touching `address` (Neighbor teardown on
    /// keepalive exhaustion, §4.2).
    pub fn remove_edges_touching(&mut self, address: u64) {
        self.edges
            .retain(|(src, dst), _| *src != address && *dst != address);
    }

    pub fn edge(&self, src: u64, dst: u64) -> Option<&LowerFlow> {
        self.edges.get(&(src, dst))
    }

    pub fn all(&self) -> Vec<LowerFlow> {
        self.edges.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(src: u64, dst: u64, seq: u64, state: LowerFlowState) -> LowerFlow {
        LowerFlow {
            src_address: src,
            dst_address: dst,
            cost: 1,
            sequence_number: seq,
            age: 0,
            state,
        }
    }

    #[test]
    fn higher_sequence_number_wins() {
        let mut lfdb = Lfdb::new();
        lfdb.apply_slice(&vec![flow(1, 2, 1, LowerFlowState::Active)]);
        let accepted = lfdb.apply_slice(&vec![flow(1, 2, 2, LowerFlowState::Failed)]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(lfdb.edge(1, 2).unwrap().state, LowerFlowState::Failed);
    }

    #[test]
    fn equal_sequence_active_beats_failed() {
        let mut lfdb = Lfdb::new();
        lfdb.apply_slice(&vec![flow(1, 2, 5, LowerFlowState::Failed)]);
        let accepted = lfdb.apply_slice(&vec![flow(1, 2, 5, LowerFlowState::Active)]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(lfdb.edge(1, 2).unwrap().state, LowerFlowState::Active);
    }

    #[test]
    fn lower_sequence_number_is_rejected() {
        let mut lfdb = Lfdb::new();
        lfdb.apply_slice(&vec![flow(1, 2, 5, LowerFlowState::Active)]);
        let accepted = lfdb.apply_slice(&vec![flow(1, 2, 3, LowerFlowState::Active)]);
        assert!(accepted.is_empty());
        assert_eq!(lfdb.edge(1, 2).unwrap().sequence_number, 5);
    }

    #[test]
    fn self_edge_commit_is_active() {
        let mut lfdb = Lfdb::new();
        lfdb.commit_self_edge(42, 43, 1, 1);
        assert_eq!(lfdb.edge(42, 43).unwrap().state, LowerFlowState::Active);
    }

    #[test]
    fn removing_edges_touching_address_clears_both_directions() {
        let mut lfdb = Lfdb::new();
        lfdb.commit_self_edge(42, 43, 1, 1);
        lfdb.apply_slice(&vec![flow(43, 42, 1, LowerFlowState::Active)]);
        lfdb.remove_edges_touching(43);
        assert!(lfdb.is_empty());
    }
}
