// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Neighbor and NeighFlow: the per-peer state the RIB owns directly (§3,
//! §9 Design Note — "RIB owns Neighbors owns NFs", no back-pointers). A
//! NeighFlow is addressed by (neighbor canonical name, port-id) from
//! outside; nothing outside this module holds a reference into it.

use std::collections::HashMap;

use crate::cdap::InvokeIdGenerator;
use crate::enroll::fsm::EnrollState;
use crate::name::Name;

/// The event-loop timer id for one armed timer; opaque outside the event
/// loop, but threaded through here so a NeighFlow can remember which timer
/// is currently live and cancel it on restart (§4.2: "restarting an active
/// timer cancels the old one").
pub type TimerId = u64;

/// One management connection to a neighbour (§4.2).
pub struct NeighFlow {
    pub port_id: u32,
    pub supporting_dif: String,
    pub cdap_invoke_ids: InvokeIdGenerator,
    pub enrollment_state: EnrollState,
    pub enroll_attempts: u32,
    pub pending_keepalive_count: u32,
    pub enroll_timer: Option<TimerId>,
    pub keepalive_timer: Option<TimerId>,
}

impl NeighFlow {
    pub fn new(port_id: u32, supporting_dif: impl Into<String>, initiator: bool) -> Self {
        Self {
            port_id,
            supporting_dif: supporting_dif.into(),
            cdap_invoke_ids: InvokeIdGenerator::default(),
            enrollment_state: EnrollState::None,
            enroll_attempts: 0,
            pending_keepalive_count: 0,
            enroll_timer: None,
            keepalive_timer: None,
        }
        .with_initiator_marker(initiator)
    }

    // EnrollState itself carries no initiator/slave tag; the marker lives
    // only in which transitions get driven (initiator calls
    // InitiateEnrollment, slave waits for an inbound M_CONNECT). Kept as a
    // no-op hook so construction reads the same either way.
    fn with_initiator_marker(self, _initiator: bool) -> Self {
        self
    }

    pub fn is_enrolled(&self) -> bool {
        self.enrollment_state == EnrollState::Enrolled
    }
}

/// Collection of NFs to one peer (§3). `mgmt_port_id` selects which NF
/// carries CDAP; invariant: `mgmt_port_id ∈ flows.keys()` whenever `flows`
/// is non-empty (§3, §8 invariant 2).
pub struct Neighbor {
    pub name: Name,
    pub initiator: bool,
    /// The peer's RINA address, once known (via enrolment or a gossiped
    /// Neighbors object). `None` until learned.
    pub address: Option<u64>,
    pub flows: HashMap<u32, NeighFlow>,
    pub mgmt_port_id: Option<u32>,
}

impl Neighbor {
    pub fn new(name: Name, initiator: bool) -> Self {
        Self {
            name,
            initiator,
            address: None,
            flows: HashMap::new(),
            mgmt_port_id: None,
        }
    }

    pub fn add_flow(&mut self, port_id: u32, supporting_dif: impl Into<String>) -> &mut NeighFlow {
        let flow = NeighFlow::new(port_id, supporting_dif, self.initiator);
        if self.mgmt_port_id.is_none() {
            self.mgmt_port_id = Some(port_id);
        }
        self.flows.entry(port_id).or_insert(flow)
    }

    pub fn mgmt_flow(&self) -> Option<&NeighFlow> {
        self.mgmt_port_id.and_then(|p| self.flows.get(&p))
    }

    pub fn mgmt_flow_mut(&mut self) -> Option<&mut NeighFlow> {
        let p = self.mgmt_port_id?;
        self.flows.get_mut(&p)
    }

    pub fn is_enrolled(&self) -> bool {
        self.mgmt_flow().map(|nf| nf.is_enrolled()).unwrap_or(false)
    }

    /// Removes the NF at `port_id`. If it was the management NF, elects
    /// any remaining NF as the replacement; returns `true` if the Neighbor
    /// is now empty and should be deleted (§4.2 keepalive eviction).
    pub fn remove_flow(&mut self, port_id: u32) -> bool {
        self.flows.remove(&port_id);
        if self.mgmt_port_id == Some(port_id) {
            self.mgmt_port_id = self.flows.keys().next().copied();
        }
        self.flows.is_empty()
    }

    /// Re-elects the management NF to `port_id` (tie-break on simultaneous
    /// enrolment from the same peer over two flows, §4.3).
    pub fn reelect_mgmt(&mut self, port_id: u32) {
        if self.flows.contains_key(&port_id) {
            self.mgmt_port_id = Some(port_id);
        }
    }
}
