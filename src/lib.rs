// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! `ari`: the normal-IPCP control plane of a RINA stack (§1 PURPOSE &
//! SCOPE) — neighbour enrolment, the gossiped RIB, and the per-IPCP event
//! loop that drives both over a shim (shim-udp4 or shim-hv).
//!
//! The in-kernel data plane, the enrolment CLI, CDAP wire encoding details
//! beyond the codec this crate implements, and packet encoding on the shim
//! transports are all out of scope (§1) and have no module here.

pub mod cdap;
pub mod config;
pub mod control;
pub mod enroll;
pub mod error;
pub mod ipcp;
pub mod kernel;
pub mod name;
pub mod rib;
pub mod shim;

pub use cdap::{decode_message, encode_message, CdapMessage, CdapOpCode, InvokeIdGenerator};
pub use config::{CliArgs, IpcpConfiguration, IpcpMode, ShimKind};
pub use control::{LocalCommand, LocalRequest, LocalResponse};
pub use enroll::fsm::EnrollState;
pub use error::{AriError, EnrollmentError, KernelError, RibError, ShimError};
pub use ipcp::{Ipcp, IpcpHandle};
pub use kernel::KernelMessage;
pub use name::Name;
pub use rib::{Dft, DftEntry, Lfdb, LowerFlow, NeighFlow, Neighbor, NeighborCandidate, Rib, RibValue};
pub use shim::{hv::ShimHv, udp4::ShimUdp4, Shim, ShimChannel};
