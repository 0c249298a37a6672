// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! The enrolment sub-system (§4.3): the pure transition function in
//! [`fsm`], the wire objects it carries in [`obj`], and the timing
//! constants the event loop arms around it.

pub mod fsm;
pub mod obj;

/// Per-state enrolment timeout (§4.3).
pub const ENROLL_TO_MS: u64 = 1500;
/// Maximum initiator retry attempts before giving up permanently (§4.3, §8 S2).
pub const MAX_ATTEMPTS: u32 = 3;
/// Keepalive probe interval once ENROLLED (§4.2).
pub const KEEPALIVE_INTVAL_MS: u64 = 5000;
/// Consecutive missed keepalive replies before the NF is considered dead (§4.2).
pub const KEEPALIVE_THRESH: u32 = 3;
/// Default chunk size for `sync_neigh`'s full-snapshot push (§4.4).
pub const SYNC_CHUNK_LIMIT: usize = 64;
