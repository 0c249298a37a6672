// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Shim IPCPs (§4.5): the lower layer that does not enrol, translating
//! between the generic kernel control-channel protocol ([`crate::kernel`])
//! and a non-RINA transport. Both shims implement one [`Shim`] trait so
//! the event loop can address either polymorphically — the teacher's
//! `inter_ipcp_fal.rs` references an `Arc<dyn Shim>` seam without ever
//! defining it; this module defines it for real.

pub mod hv;
pub mod udp4;

use tokio::sync::mpsc;

use crate::error::ShimError;
use crate::kernel::KernelMessage;
use crate::name::Name;

/// The up-call half of the kernel control channel (§6) for a shim running
/// as its own background task. Down-calls go straight through the
/// [`Shim`] trait's async methods — in-process, there is no need to frame
/// them as bytes — but up-calls (`FaReqArrived`, `SduRecv`,
/// `FlowDeallocated`, ...) are unsolicited, so the event loop receives
/// them off this channel rather than as a return value. The byte-framed
/// encoding in [`crate::kernel`] stays available for anything that does
/// need a real cross-process boundary (the control socket reuses it);
/// the shims in this module just push `KernelMessage` values directly.
pub struct ShimChannel {
    pub from_shim: mpsc::Receiver<KernelMessage>,
}

/// Common behaviour of a shim IPCP (§4.5 AMBIENT note): resolve or accept
/// peers, move flow-allocation up/down-calls, and reduce to the same
/// `KernelMessage` vocabulary the rest of the control plane already
/// speaks regardless of whether the foreign transport is UDP or a
/// hypervisor channel. Native `async fn` in this trait (stable since
/// Rust 1.75) is enough here — nothing needs `dyn Shim`, since the event
/// loop holds one concrete shim per IPCP chosen at startup by
/// `config::ShimKind`.
pub trait Shim: Send + Sync {
    /// Human-readable name of this shim instance, used as a lower-DIF name
    /// in `NeighborCandidate.lower_difs` / RIB bookkeeping.
    fn dif_name(&self) -> &str;

    /// Registers a local application name so inbound implicit/explicit
    /// flow-allocation requests addressed to it are accepted.
    async fn register(&self, name: Name) -> Result<(), ShimError>;

    /// Unregisters a previously registered local name.
    async fn unregister(&self, name: &Name) -> Result<(), ShimError>;

    /// Initiates an outbound flow toward `dst_appl`, returning the local
    /// port-id once the foreign transport accepts the rendezvous.
    async fn allocate(&self, src_appl: &Name, dst_appl: &Name) -> Result<u32, ShimError>;

    /// Writes an SDU on an already-allocated port.
    async fn send(&self, port_id: u32, bytes: Vec<u8>) -> Result<(), ShimError>;

    /// Tears down a previously allocated port.
    async fn deallocate(&self, port_id: u32) -> Result<(), ShimError>;

    /// Resolves a pending inbound `FaReqArrived` for `port_id` one way or
    /// the other. The normal IPCP event loop (§4.1) calls this with
    /// `accept=true` for every inbound rendezvous addressed to its
    /// management AE, since a Neighbor is created lazily on first inbound
    /// management flow (§3 lifecycle) rather than gated by any policy
    /// this crate implements.
    async fn accept(&self, port_id: u32, accept: bool);
}
