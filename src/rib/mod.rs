// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Resource Information Base (§3, §4.4): the replicated, eventually
//! consistent knowledge base an IPCP holds about its DIF. Owns the DFT,
//! LFDB, Neighbor-Candidate set, the generic object store, and — per
//! Design Note §9's single-owning-container re-architecture — every
//! Neighbor and its NeighFlows. Every mutation goes through `&mut Rib`;
//! the event loop is the sole caller, so "the RIB mutex" of §5 is simply
//! "this struct lives on the event-loop task".

pub mod candidate;
pub mod dft;
pub mod lfdb;
pub mod neighbor;
pub mod object;

pub use candidate::{NeighborCandidate, NeighborCandidateSet};
pub use dft::{Dft, DftEntry, DftSlice};
pub use lfdb::{Lfdb, LfdbSlice, LowerFlow, LowerFlowState};
pub use neighbor::{NeighFlow, Neighbor, TimerId};
pub use object::{ObjectStore, RibChange, RibObject, RibValue};

use std::collections::HashMap;

use serde::Serialize;

use crate::cdap::CdapMessage;
use crate::enroll::obj::{
    NeighborsObject, CLASS_DFT, CLASS_KEEPALIVE, CLASS_LFDB, CLASS_NEIGHBORS, OBJ_DFT,
    OBJ_KEEPALIVE, OBJ_LFDB, OBJ_NEIGHBORS,
};
use crate::error::{RibError, SerializationError};
use crate::name::Name;

/// A message the caller (event loop) must still write to the kernel on
/// behalf of `neighbor`/`port_id` — the RIB only decides *what* to send,
/// never performs the write itself.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub neighbor: String,
    pub port_id: u32,
    pub message: CdapMessage,
}

/// Draws addresses from a configured pool (Design Note §9: "addresses
/// come from a configured pool and... collision detection falls back to
/// the candidate-neighbour set").
#[derive(Debug, Clone)]
pub struct AddressPool {
    pub start: u64,
    pub end: u64,
    next_hint: u64,
}

impl AddressPool {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            next_hint: start,
        }
    }

    /// Returns the first candidate in `[start, end]` (scanning from the
    /// last-returned slot, wrapping) for which `taken` reports false.
    fn allocate(&mut self, taken: impl Fn(u64) -> bool) -> Result<u64, RibError> {
        if self.start == 0 || self.end < self.start {
            return Err(RibError::AddressPoolExhausted {
                pool_start: self.start,
                pool_end: self.end,
            });
        }
        let span = self.end - self.start + 1;
        for i in 0..span {
            let candidate = self.start + (self.next_hint - self.start + i) % span;
            if candidate != 0 && !taken(candidate) {
                self.next_hint = if candidate == self.end {
                    self.start
                } else {
                    candidate + 1
                };
                return Ok(candidate);
            }
        }
        Err(RibError::AddressPoolExhausted {
            pool_start: self.start,
            pool_end: self.end,
        })
    }
}

/// The Resource Information Base for one IPCP (§3).
pub struct Rib {
    pub local_name: Name,
    pub local_address: u64,
    pub dif_name: String,
    pub lower_difs: Vec<String>,

    dft: Dft,
    lfdb: Lfdb,
    candidates: NeighborCandidateSet,
    objects: ObjectStore,
    neighbors: HashMap<String, Neighbor>,
    address_pool: AddressPool,
    lfdb_sequence: u64,
}

impl Rib {
    pub fn new(
        local_name: Name,
        local_address: u64,
        dif_name: impl Into<String>,
        lower_difs: Vec<String>,
        pool_start: u64,
        pool_end: u64,
    ) -> Self {
        Self {
            local_name,
            local_address,
            dif_name: dif_name.into(),
            lower_difs,
            dft: Dft::new(),
            lfdb: Lfdb::new(),
            candidates: NeighborCandidateSet::new(),
            objects: ObjectStore::new(),
            neighbors: HashMap::new(),
            address_pool: AddressPool::new(pool_start, pool_end),
            lfdb_sequence: 0,
        }
    }

    pub fn dft(&self) -> &Dft {
        &self.dft
    }

    pub fn lfdb(&self) -> &Lfdb {
        &self.lfdb
    }

    pub fn candidates(&self) -> &NeighborCandidateSet {
        &self.candidates
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    pub fn neighbor(&self, name: &str) -> Option<&Neighbor> {
        self.neighbors.get(name)
    }

    pub fn neighbor_mut(&mut self, name: &str) -> Option<&mut Neighbor> {
        self.neighbors.get_mut(name)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Creates the Neighbor lazily on first enrolment attempt or first
    /// inbound management flow (§3 lifecycle).
    pub fn get_or_create_neighbor(&mut self, name: Name, initiator: bool) -> &mut Neighbor {
        self.neighbors
            .entry(name.canonical())
            .or_insert_with(|| Neighbor::new(name, initiator))
    }

    /// Removes the NF at `port_id` on `neighbor_name`; deletes the
    /// Neighbor entirely if it has no flows left (§4.2). Also prunes any
    /// LFDB edge to the neighbour's known address.
    pub fn remove_flow(&mut self, neighbor_name: &str, port_id: u32) {
        let Some(neighbor) = self.neighbors.get_mut(neighbor_name) else {
            return;
        };
        let now_empty = neighbor.remove_flow(port_id);
        if now_empty {
            if let Some(addr) = neighbor.address {
                self.lfdb.remove_edges_touching(addr);
            }
            self.neighbors.remove(neighbor_name);
        }
    }

    // ---- §4.4 operations ----------------------------------------------

    /// `address_allocate`: a fresh address not currently held by any
    /// candidate neighbour or local entity.
    pub fn address_allocate(&mut self) -> Result<u64, RibError> {
        let local = self.local_address;
        let candidates = &self.candidates;
        let neighbors = &self.neighbors;
        self.address_pool.allocate(|addr| {
            addr == local
                || candidates.contains_address(addr)
                || neighbors.values().any(|n| n.address == Some(addr))
        })
    }

    /// `appl_register`: local DFT register/unregister plus the fan-out
    /// messages the caller must send to every enrolled neighbour.
    pub fn appl_register(
        &mut self,
        name: &str,
        register: bool,
        now: u64,
    ) -> Result<Vec<Outbound>, RibError> {
        if register {
            let entry = self.dft.register_local(name, self.local_address, now)?;
            Ok(self.fan_out_dft(true, vec![entry], None))
        } else {
            let entry = self.dft.unregister_local(name, self.local_address)?;
            Ok(self.fan_out_dft(false, vec![entry], None))
        }
    }

    /// `dft_handler`: applies an inbound M_CREATE/M_DELETE DFT slice from
    /// `sender`, then propagates the accepted delta to every other
    /// enrolled neighbour.
    pub fn dft_handler(
        &mut self,
        sender: &str,
        msg: &CdapMessage,
    ) -> Result<Vec<Outbound>, RibError> {
        let slice: DftSlice = msg.object().map_err(|e| RibError::DeserializationFailed(e.to_string()))?;
        let mut out = Vec::new();
        match msg.op_code {
            crate::cdap::CdapOpCode::MCreate => {
                let (accepted, displaced) = self.dft.apply_add_slice(&slice);
                if !accepted.is_empty() {
                    out.extend(self.fan_out_dft(true, accepted, Some(sender)));
                }
                if !displaced.is_empty() {
                    out.extend(self.fan_out_dft(false, displaced, Some(sender)));
                }
            }
            crate::cdap::CdapOpCode::MDelete => {
                let removed = self.dft.apply_delete_slice(&slice);
                if !removed.is_empty() {
                    out.extend(self.fan_out_dft(false, removed, Some(sender)));
                }
            }
            other => return Err(RibError::OperationFailed(format!("unexpected opcode for DFT object: {other}"))),
        }
        Ok(out)
    }

    /// `lfdb_update`: analogous to `dft_handler`, keyed by (src,dst).
    pub fn lfdb_handler(&mut self, sender: &str, msg: &CdapMessage) -> Result<Vec<Outbound>, RibError> {
        let slice: LfdbSlice = msg
            .object()
            .map_err(|e| RibError::DeserializationFailed(e.to_string()))?;
        let accepted = self.lfdb.apply_slice(&slice);
        if accepted.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.fan_out_lfdb(accepted, Some(sender)))
    }

    /// `neighbors_handler`: merges an inbound Neighbors object into the
    /// candidate set, returning the candidates actually accepted.
    pub fn neighbors_handler(&mut self, msg: &CdapMessage) -> Result<Vec<NeighborCandidate>, RibError> {
        let obj: NeighborsObject = msg
            .object()
            .map_err(|e| RibError::DeserializationFailed(e.to_string()))?;
        Ok(self
            .candidates
            .merge(&obj.candidates, &self.local_name, &self.lower_difs))
    }

    /// `keepalive_handler`: M_READ replies with M_READ_R; M_READ_R resets
    /// the NF's `pending_keepalive_count`.
    pub fn keepalive_handler(&mut self, neighbor: &str, port_id: u32, msg: &CdapMessage) -> Vec<Outbound> {
        match msg.op_code {
            crate::cdap::CdapOpCode::MRead => vec![Outbound {
                neighbor: neighbor.to_string(),
                port_id,
                message: msg.response(crate::cdap::CdapOpCode::MReadR, 0, None),
            }],
            crate::cdap::CdapOpCode::MReadR => {
                if let Some(n) = self.neighbors.get_mut(neighbor) {
                    if let Some(nf) = n.flows.get_mut(&port_id) {
                        nf.pending_keepalive_count = 0;
                    }
                }
                vec![]
            }
            _ => vec![],
        }
    }

    /// Dispatches any inbound management message once a Neighbor is past
    /// enrolment (§4.3 transition 8) or during I_WAIT_STOP's M_CREATE
    /// acceptance, by object name.
    pub fn dispatch(
        &mut self,
        sender: &str,
        sender_port: u32,
        msg: &CdapMessage,
    ) -> Result<Vec<Outbound>, RibError> {
        match msg.obj_name.as_str() {
            OBJ_DFT => self.dft_handler(sender, msg),
            OBJ_LFDB => self.lfdb_handler(sender, msg),
            OBJ_NEIGHBORS => {
                self.neighbors_handler(msg)?;
                Ok(vec![])
            }
            OBJ_KEEPALIVE => Ok(self.keepalive_handler(sender, sender_port, msg)),
            _ => Ok(vec![]),
        }
    }

    /// `neighs_sync_obj_excluding` / `neighs_sync_obj_all`: fan a DFT
    /// slice change out to every *enrolled* neighbour, optionally skipping
    /// the sender.
    fn fan_out_dft(&self, create: bool, slice: DftSlice, excluding: Option<&str>) -> Vec<Outbound> {
        let op = if create {
            crate::cdap::CdapOpCode::MCreate
        } else {
            crate::cdap::CdapOpCode::MDelete
        };
        self.neighs_sync_obj(excluding, |invoke_id| {
            crate::cdap::CdapMessage::request(op, OBJ_DFT, invoke_id)
                .with_class(CLASS_DFT)
                .with_object(&slice)
                .expect("DFT slice always encodes")
        })
    }

    fn fan_out_lfdb(&self, slice: LfdbSlice, excluding: Option<&str>) -> Vec<Outbound> {
        self.neighs_sync_obj(excluding, |invoke_id| {
            crate::cdap::CdapMessage::request(crate::cdap::CdapOpCode::MCreate, OBJ_LFDB, invoke_id)
                .with_class(CLASS_LFDB)
                .with_object(&slice)
                .expect("LFDB slice always encodes")
        })
    }

    fn neighs_sync_obj(
        &self,
        excluding: Option<&str>,
        build: impl Fn(u64) -> CdapMessage,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();
        for (name, neighbor) in &self.neighbors {
            if Some(name.as_str()) == excluding {
                continue;
            }
            if !neighbor.is_enrolled() {
                continue;
            }
            let Some(port_id) = neighbor.mgmt_port_id else {
                continue;
            };
            out.push(Outbound {
                neighbor: name.clone(),
                port_id,
                message: build(port_id as u64),
            });
        }
        out
    }

    /// `sync_neigh`: chunks DFT/LFDB/Neighbor-Candidate contents into
    /// M_CREATE messages of at most `limit` entries each, used as the full
    /// snapshot pushed at enrolment completion (§4.3 transitions 6/7).
    pub fn sync_neigh(&self, neighbor_name: &str, limit: usize) -> Result<Vec<Outbound>, RibError> {
        let neighbor = self
            .neighbors
            .get(neighbor_name)
            .ok_or_else(|| RibError::NotFound(neighbor_name.to_string()))?;
        let port_id = neighbor
            .mgmt_port_id
            .ok_or_else(|| RibError::OperationFailed("neighbour has no management flow".into()))?;

        let mut out = Vec::new();
        for chunk in self.dft.all().chunks(limit.max(1)) {
            out.push(Outbound {
                neighbor: neighbor_name.to_string(),
                port_id,
                message: CdapMessage::request(crate::cdap::CdapOpCode::MCreate, OBJ_DFT, 0)
                    .with_class(CLASS_DFT)
                    .with_object(&chunk.to_vec())
                    .expect("DFT slice always encodes"),
            });
        }
        for chunk in self.lfdb.all().chunks(limit.max(1)) {
            out.push(Outbound {
                neighbor: neighbor_name.to_string(),
                port_id,
                message: CdapMessage::request(crate::cdap::CdapOpCode::MCreate, OBJ_LFDB, 0)
                    .with_class(CLASS_LFDB)
                    .with_object(&chunk.to_vec())
                    .expect("LFDB slice always encodes"),
            });
        }
        for chunk in self.candidates.all().chunks(limit.max(1)) {
            out.push(Outbound {
                neighbor: neighbor_name.to_string(),
                port_id,
                message: CdapMessage::request(crate::cdap::CdapOpCode::MCreate, OBJ_NEIGHBORS, 0)
                    .with_class(CLASS_NEIGHBORS)
                    .with_object(&NeighborsObject {
                        candidates: chunk.to_vec(),
                    })
                    .expect("Neighbors object always encodes"),
            });
        }
        Ok(out)
    }

    /// `set_address`: changes the local address, rewrites every
    /// local-flagged DFT entry with a fresh timestamp, and propagates the
    /// delta to every enrolled neighbour.
    pub fn set_address(&mut self, new_address: u64, now: u64) -> Vec<Outbound> {
        self.local_address = new_address;
        let updated = self.dft.update_local_address(new_address, now);
        if updated.is_empty() {
            vec![]
        } else {
            self.fan_out_dft(true, updated, None)
        }
    }

    /// Commits the self-edge created when a Neighbor finishes enrolment
    /// (§4.3 transitions 6/7): an ACTIVE edge `local_address <-> peer`.
    pub fn commit_self_edge(&mut self, peer_address: u64) -> LowerFlow {
        self.lfdb_sequence += 1;
        self.lfdb
            .commit_self_edge(self.local_address, peer_address, 1, self.lfdb_sequence)
    }

    /// Records a directly-known peer as a neighbour candidate (§4.3
    /// transition 4's `RecordCandidate` action).
    pub fn record_candidate(&mut self, name: Name, address: u64) {
        self.candidates.insert(NeighborCandidate {
            name,
            address,
            lower_difs: self.lower_difs.clone(),
        });
    }

    /// Operator-facing snapshot of the whole RIB, for the local control
    /// socket's `DumpRib` command (§6 SUPPLEMENT). Read-only: taking a
    /// snapshot never mutates sequence numbers or timers.
    pub fn snapshot(&self) -> RibSnapshot {
        RibSnapshot {
            local_name: self.local_name.canonical(),
            local_address: self.local_address,
            dif_name: self.dif_name.clone(),
            lower_difs: self.lower_difs.clone(),
            dft: self.dft.all(),
            lfdb: self.lfdb.all(),
            candidates: self.candidates.all(),
            neighbors: self
                .neighbors
                .values()
                .map(NeighborSummary::from)
                .collect(),
        }
    }

    /// Renders [`Rib::snapshot`] as pretty-printed JSON for a human
    /// operator reading the control socket's reply (the wire framing
    /// itself stays `postcard`-encoded; only the payload string is JSON).
    pub fn dump_json(&self) -> Result<String, SerializationError> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(SerializationError::from)
    }
}

/// One neighbour's management state, flattened for JSON display — not the
/// wire-format `Neighbors` RIB object, which carries only name/address/
/// lower-DIFs (see [`NeighborCandidate`]).
#[derive(Debug, Clone, Serialize)]
pub struct NeighborSummary {
    pub name: String,
    pub address: Option<u64>,
    pub initiator: bool,
    pub mgmt_port_id: Option<u32>,
    pub enrolled: bool,
    pub flows: Vec<NeighFlowSummary>,
}

impl From<&Neighbor> for NeighborSummary {
    fn from(n: &Neighbor) -> Self {
        Self {
            name: n.name.canonical(),
            address: n.address,
            initiator: n.initiator,
            mgmt_port_id: n.mgmt_port_id,
            enrolled: n.is_enrolled(),
            flows: n.flows.values().map(NeighFlowSummary::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighFlowSummary {
    pub port_id: u32,
    pub supporting_dif: String,
    pub enrollment_state: String,
    pub pending_keepalive_count: u32,
}

impl From<&NeighFlow> for NeighFlowSummary {
    fn from(nf: &NeighFlow) -> Self {
        Self {
            port_id: nf.port_id,
            supporting_dif: nf.supporting_dif.clone(),
            enrollment_state: format!("{:?}", nf.enrollment_state),
            pending_keepalive_count: nf.pending_keepalive_count,
        }
    }
}

/// JSON-serializable snapshot of the entire RIB, returned by [`Rib::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct RibSnapshot {
    pub local_name: String,
    pub local_address: u64,
    pub dif_name: String,
    pub lower_difs: Vec<String>,
    pub dft: Vec<DftEntry>,
    pub lfdb: Vec<LowerFlow>,
    pub candidates: Vec<NeighborCandidate>,
    pub neighbors: Vec<NeighborSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rib(local_address: u64) -> Rib {
        Rib::new(
            Name::new("me"),
            local_address,
            "test-dif",
            vec!["shim0".into()],
            1000,
            1010,
        )
    }

    #[test]
    fn address_allocate_skips_addresses_already_taken() {
        let mut r = rib(1000);
        r.record_candidate(Name::new("peer"), 1001);
        let a = r.address_allocate().unwrap();
        assert_eq!(a, 1002);
    }

    #[test]
    fn address_allocate_exhausts_pool() {
        let mut r = Rib::new(Name::new("me"), 5, "d", vec![], 5, 5);
        // the only pool address equals our own local address -> exhausted.
        assert!(r.address_allocate().is_err());
    }

    #[test]
    fn appl_register_rejects_duplicate_local_name() {
        let mut r = rib(1000);
        r.appl_register("foo/1", true, 1).unwrap();
        assert!(r.appl_register("foo/1", true, 2).is_err());
    }

    #[test]
    fn dft_handler_propagates_to_other_enrolled_neighbors_not_sender() {
        let mut r = rib(1000);
        let a = r.get_or_create_neighbor(Name::new("a"), true);
        a.add_flow(1, "shim0");
        a.mgmt_flow_mut().unwrap().enrollment_state = crate::enroll::fsm::EnrollState::Enrolled;
        let b = r.get_or_create_neighbor(Name::new("b"), true);
        b.add_flow(2, "shim0");
        b.mgmt_flow_mut().unwrap().enrollment_state = crate::enroll::fsm::EnrollState::Enrolled;

        let slice = vec![DftEntry {
            appl_name: "foo/1".into(),
            address: 2000,
            timestamp: 1,
            local_flag: false,
        }];
        let msg = CdapMessage::request(crate::cdap::CdapOpCode::MCreate, OBJ_DFT, 1)
            .with_class(CLASS_DFT)
            .with_object(&slice)
            .unwrap();
        let out = r.dft_handler("a", &msg).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].neighbor, "b");
    }
}
