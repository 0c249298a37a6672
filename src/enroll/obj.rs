// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Object names/classes and nested-object payloads shared by the
//! enrolment handshake and the RIB gossip objects it bootstraps.

use serde::{Deserialize, Serialize};

use crate::name::Name;

pub const OBJ_ENROLLMENT: &str = "/dif/mgmt/enrollment";
pub const CLASS_ENROLLMENT: &str = "enrollment";
pub const OBJ_NEIGHBORS: &str = "/dif/mgmt/neighbors";
pub const CLASS_NEIGHBORS: &str = "neighbors";
pub const OBJ_KEEPALIVE: &str = "/dif/mgmt/keepalive";
pub const CLASS_KEEPALIVE: &str = "keepalive";
pub const OBJ_DFT: &str = "/dif/mgmt/fa/dft";
pub const CLASS_DFT: &str = "dft";
pub const OBJ_LFDB: &str = "/dif/mgmt/fa/lfdb";
pub const CLASS_LFDB: &str = "lfdb";
pub const OBJ_STATUS: &str = "/dif/mgmt/enrollment/status";

/// Carried on M_START by the initiator (transition 3) and echoed back
/// (with an assigned address if the initiator had none) on M_START_R by
/// the slave (transition 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentObject {
    pub name: Name,
    pub address: u64,
    pub lower_difs: Vec<String>,
}

/// The one-element `Neighbors` object the slave sends alongside M_STOP in
/// transition 4, representing itself as a reachable candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsObject {
    pub candidates: Vec<crate::rib::candidate::NeighborCandidate>,
}
