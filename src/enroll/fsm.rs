// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! The eight-state enrolment handshake (§4.3), realised as the pure
//! transition function Design Note §9 asks for: `transition(state, event,
//! context) -> (state, actions)`. Actions are emitted as data (send a
//! CDAP message, arm a timer, commit a RIB edge, signal completion) and
//! performed by the caller (the NeighFlow actor), so this function touches
//! no socket, timer, or mutex and is exercised with plain `#[test]`.

use serde::{Deserialize, Serialize};

use crate::cdap::{CdapFlags, CdapMessage, CdapOpCode};
use crate::error::EnrollmentError;
use crate::name::Name;

use super::obj::{
    EnrollmentObject, NeighborsObject, CLASS_ENROLLMENT, CLASS_NEIGHBORS, OBJ_ENROLLMENT,
    OBJ_NEIGHBORS, OBJ_STATUS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollState {
    None,
    IWaitConnectR,
    SWaitStart,
    IWaitStartR,
    SWaitStopR,
    IWaitStop,
    IWaitStart,
    Enrolled,
}

impl EnrollState {
    pub fn is_initiator_state(&self) -> bool {
        matches!(
            self,
            EnrollState::IWaitConnectR
                | EnrollState::IWaitStartR
                | EnrollState::IWaitStop
                | EnrollState::IWaitStart
        )
    }

    pub fn is_slave_state(&self) -> bool {
        matches!(self, EnrollState::SWaitStart | EnrollState::SWaitStopR)
    }
}

/// What drives a transition: either a local kick-off (initiator begins),
/// an inbound CDAP message, or the per-state enrolment timer firing.
pub enum FsmEvent {
    InitiateEnrollment,
    Recv(CdapMessage),
    EnrollTimeout,
}

/// Everything the transition function needs to know about "us" and this
/// attempt; it never reaches into the RIB or the network itself.
pub struct FsmContext {
    pub initiator: bool,
    pub local_name: Name,
    pub local_address: u64,
    pub lower_difs: Vec<String>,
    pub enroll_attempts: u32,
    pub max_attempts: u32,
    pub peer_candidates: Vec<crate::rib::candidate::NeighborCandidate>,
    /// An address the caller (the RIB, which owns the address pool) has
    /// already drawn for the peer in case this transition turns out to be
    /// `S_WAIT_START` handling a peer with `address == 0` (Design Note §9:
    /// address allocation is an open question resolved by a configured
    /// pool owned by the RIB, which the pure FSM cannot reach into
    /// itself). Ignored by every other transition.
    pub allocated_address: Option<u64>,
}

/// Side effects requested by a transition. The caller performs these
/// after applying the returned state.
pub enum FsmAction {
    Send {
        message: CdapMessage,
    },
    StartEnrollTimer,
    StopEnrollTimer,
    StartKeepaliveTimer,
    /// Commit the self-edge to `peer_address` in the LFDB and push a full
    /// RIB snapshot to the peer (§4.3 transitions 6/7).
    CommitSelfEdgeAndSnapshot {
        peer_address: u64,
    },
    /// Adopt an address assigned by the slave (transition 5).
    AdoptAddress(u64),
    /// Record the peer as a neighbour candidate (transition 4).
    RecordCandidate(Name, u64),
    SignalCompletion(Result<(), EnrollmentError>),
    /// Reset to NONE: send M_RELEASE, reset the CDAP session state, and
    /// (initiator only, attempts remaining) retry from the top.
    Abort {
        retry: bool,
    },
    /// A message arrived post-enrolment (or an M_CREATE during
    /// I_WAIT_STOP) that belongs to the RIB object dispatcher, not this
    /// FSM.
    ForwardToRib(CdapMessage),
}

fn protocol_violation(
    ctx: &FsmContext,
    reason: &str,
) -> (EnrollState, Vec<FsmAction>) {
    (
        EnrollState::None,
        vec![
            FsmAction::StopEnrollTimer,
            FsmAction::SignalCompletion(Err(EnrollmentError::ProtocolViolation(
                reason.to_string(),
            ))),
            FsmAction::Abort {
                retry: ctx.initiator && ctx.enroll_attempts + 1 < ctx.max_attempts,
            },
        ],
    )
}

/// Pure enrolment transition, §4.3.
pub fn transition(
    state: EnrollState,
    event: FsmEvent,
    ctx: &FsmContext,
) -> (EnrollState, Vec<FsmAction>) {
    match (state, event) {
        // 1. NONE(I) -> send M_CONNECT -> I_WAIT_CONNECT_R
        (EnrollState::None, FsmEvent::InitiateEnrollment) if ctx.initiator => {
            let msg = CdapMessage::request(CdapOpCode::MConnect, "", 0);
            (
                EnrollState::IWaitConnectR,
                vec![FsmAction::Send { message: msg }, FsmAction::StartEnrollTimer],
            )
        }

        // 2. NONE(S) + M_CONNECT -> send M_CONNECT_R -> S_WAIT_START
        (EnrollState::None, FsmEvent::Recv(rm)) if rm.op_code == CdapOpCode::MConnect => {
            let resp = rm.response(CdapOpCode::MConnectR, 0, None);
            (
                EnrollState::SWaitStart,
                vec![
                    FsmAction::Send { message: resp },
                    FsmAction::StartEnrollTimer,
                ],
            )
        }

        // 3. I_WAIT_CONNECT_R + M_CONNECT_R -> send M_START(enrollment) -> I_WAIT_START_R
        (EnrollState::IWaitConnectR, FsmEvent::Recv(rm))
            if rm.op_code == CdapOpCode::MConnectR && rm.is_success() =>
        {
            let obj = EnrollmentObject {
                name: ctx.local_name.clone(),
                address: ctx.local_address,
                lower_difs: ctx.lower_difs.clone(),
            };
            let msg = CdapMessage::request(CdapOpCode::MStart, OBJ_ENROLLMENT, rm.invoke_id)
                .with_class(CLASS_ENROLLMENT)
                .with_object(&obj)
                .expect("enrollment object always encodes");
            (
                EnrollState::IWaitStartR,
                vec![FsmAction::Send { message: msg }, FsmAction::StartEnrollTimer],
            )
        }

        // 4. S_WAIT_START + M_START -> allocate address if needed, reply
        //    M_START_R + Neighbors + M_STOP(start_early) -> S_WAIT_STOP_R
        (EnrollState::SWaitStart, FsmEvent::Recv(rm))
            if rm.op_code == CdapOpCode::MStart && rm.obj_name == OBJ_ENROLLMENT =>
        {
            let incoming: Result<EnrollmentObject, _> = rm.object();
            let Ok(incoming) = incoming else {
                return protocol_violation(ctx, "M_START missing enrollment object");
            };
            let assigned = if incoming.address == 0 {
                let Some(addr) = ctx.allocated_address else {
                    return protocol_violation(
                        ctx,
                        "address allocation required but none was provided by the RIB",
                    );
                };
                addr
            } else {
                incoming.address
            };
            let reply_obj = EnrollmentObject {
                name: ctx.local_name.clone(),
                address: assigned,
                lower_difs: ctx.lower_difs.clone(),
            };
            let start_r = rm
                .response(CdapOpCode::MStartR, 0, None)
                .with_object(&reply_obj)
                .expect("enrollment object always encodes");

            let neighbors_obj = NeighborsObject {
                candidates: vec![crate::rib::candidate::NeighborCandidate {
                    name: ctx.local_name.clone(),
                    address: ctx.local_address,
                    lower_difs: ctx.lower_difs.clone(),
                }],
            };
            let neighbors_msg = CdapMessage::request(CdapOpCode::MCreate, OBJ_NEIGHBORS, 0)
                .with_class(CLASS_NEIGHBORS)
                .with_object(&neighbors_obj)
                .expect("neighbors object always encodes");

            let stop = CdapMessage::request(CdapOpCode::MStop, OBJ_STATUS, 0)
                .with_flags(CdapFlags { start_early: true });

            (
                EnrollState::SWaitStopR,
                vec![
                    FsmAction::RecordCandidate(incoming.name, assigned),
                    FsmAction::Send { message: start_r },
                    FsmAction::Send {
                        message: neighbors_msg,
                    },
                    FsmAction::Send { message: stop },
                    FsmAction::StartEnrollTimer,
                ],
            )
        }

        // 5. I_WAIT_START_R + M_START_R -> adopt assigned address -> I_WAIT_STOP
        (EnrollState::IWaitStartR, FsmEvent::Recv(rm))
            if rm.op_code == CdapOpCode::MStartR =>
        {
            if !rm.is_success() {
                return (
                    EnrollState::None,
                    vec![FsmAction::SignalCompletion(Err(EnrollmentError::Rejected(
                        rm.result_reason.clone().unwrap_or_default(),
                    )))],
                );
            }
            let incoming: Result<EnrollmentObject, _> = rm.object();
            let mut actions = vec![FsmAction::StartEnrollTimer];
            if let Ok(obj) = incoming {
                if obj.address != 0 {
                    actions.insert(0, FsmAction::AdoptAddress(obj.address));
                }
            }
            (EnrollState::IWaitStop, actions)
        }

        // 6. I_WAIT_STOP + M_STOP(start_early) -> M_STOP_R, commit edge,
        //    push snapshot, ENROLLED.
        (EnrollState::IWaitStop, FsmEvent::Recv(rm)) if rm.op_code == CdapOpCode::MStop => {
            let resp = rm.response(CdapOpCode::MStopR, 0, None);
            if rm.flags.start_early {
                (
                    EnrollState::Enrolled,
                    vec![
                        FsmAction::StopEnrollTimer,
                        FsmAction::Send { message: resp },
                        FsmAction::CommitSelfEdgeAndSnapshot {
                            peer_address: 0, // filled in by caller from adopted candidate state
                        },
                        FsmAction::StartKeepaliveTimer,
                        FsmAction::SignalCompletion(Ok(())),
                    ],
                )
            } else {
                (
                    EnrollState::IWaitStart,
                    vec![FsmAction::Send { message: resp }, FsmAction::StartEnrollTimer],
                )
            }
        }

        // I_WAIT_STOP also accepts M_CREATE pushes from the slave.
        (EnrollState::IWaitStop, FsmEvent::Recv(rm)) if rm.op_code == CdapOpCode::MCreate => {
            (EnrollState::IWaitStop, vec![FsmAction::ForwardToRib(rm)])
        }

        // 7. S_WAIT_STOP_R + M_STOP_R -> M_START(status), commit edge,
        //    push snapshot, ENROLLED.
        (EnrollState::SWaitStopR, FsmEvent::Recv(rm)) if rm.op_code == CdapOpCode::MStopR => {
            let status = CdapMessage::request(CdapOpCode::MStart, OBJ_STATUS, 0);
            (
                EnrollState::Enrolled,
                vec![
                    FsmAction::StopEnrollTimer,
                    FsmAction::Send { message: status },
                    FsmAction::CommitSelfEdgeAndSnapshot { peer_address: 0 },
                    FsmAction::StartKeepaliveTimer,
                    FsmAction::SignalCompletion(Ok(())),
                ],
            )
        }

        // 8. ENROLLED + M_START(status) -> no-op; anything else forwarded to RIB.
        (EnrollState::Enrolled, FsmEvent::Recv(rm)) => {
            if rm.op_code == CdapOpCode::MStart && rm.obj_name == OBJ_STATUS {
                (EnrollState::Enrolled, vec![])
            } else {
                (EnrollState::Enrolled, vec![FsmAction::ForwardToRib(rm)])
            }
        }

        // I_WAIT_START is a documented stub (Design Note §9): any message
        // here is a protocol violation until a non-early-start branch is
        // defined.
        (EnrollState::IWaitStart, FsmEvent::Recv(_)) => {
            protocol_violation(ctx, "I_WAIT_START has no defined non-early-start branch")
        }

        (_state, FsmEvent::EnrollTimeout) => {
            let retry = ctx.initiator && ctx.enroll_attempts + 1 < ctx.max_attempts;
            (
                EnrollState::None,
                vec![
                    FsmAction::SignalCompletion(Err(EnrollmentError::Timeout {
                        attempts: ctx.enroll_attempts + 1,
                    })),
                    FsmAction::Abort { retry },
                ],
            )
        }

        (state, _) => protocol_violation_for(state, ctx),
    }
}

fn protocol_violation_for(state: EnrollState, ctx: &FsmContext) -> (EnrollState, Vec<FsmAction>) {
    protocol_violation(ctx, &format!("unexpected event in state {state:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(initiator: bool) -> FsmContext {
        FsmContext {
            initiator,
            local_name: Name::new("me"),
            local_address: if initiator { 0 } else { 42 },
            lower_difs: vec!["L".into()],
            enroll_attempts: 0,
            max_attempts: 3,
            peer_candidates: vec![],
            allocated_address: if initiator { None } else { Some(1000) },
        }
    }

    #[test]
    fn initiator_sends_connect_and_arms_timer() {
        let (state, actions) = transition(EnrollState::None, FsmEvent::InitiateEnrollment, &ctx(true));
        assert_eq!(state, EnrollState::IWaitConnectR);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn slave_replies_to_connect_with_connect_r() {
        let msg = CdapMessage::request(CdapOpCode::MConnect, "", 1);
        let (state, actions) = transition(EnrollState::None, FsmEvent::Recv(msg), &ctx(false));
        assert_eq!(state, EnrollState::SWaitStart);
        assert!(matches!(actions[0], FsmAction::Send { .. }));
    }

    #[test]
    fn happy_path_initiator_reaches_enrolled() {
        let c = ctx(true);
        let (state, _) = transition(EnrollState::None, FsmEvent::InitiateEnrollment, &c);
        assert_eq!(state, EnrollState::IWaitConnectR);

        let connect_r = CdapMessage::request(CdapOpCode::MConnectR, "", 1);
        let (state, _) = transition(state, FsmEvent::Recv(connect_r), &c);
        assert_eq!(state, EnrollState::IWaitStartR);

        let start_obj = EnrollmentObject {
            name: Name::new("peer"),
            address: 43,
            lower_difs: vec!["L".into()],
        };
        let start_r = CdapMessage::request(CdapOpCode::MStartR, OBJ_ENROLLMENT, 1)
            .with_object(&start_obj)
            .unwrap();
        let (state, actions) = transition(state, FsmEvent::Recv(start_r), &c);
        assert_eq!(state, EnrollState::IWaitStop);
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::AdoptAddress(43))));

        let stop = CdapMessage::request(CdapOpCode::MStop, OBJ_STATUS, 1)
            .with_flags(CdapFlags { start_early: true });
        let (state, actions) = transition(state, FsmEvent::Recv(stop), &c);
        assert_eq!(state, EnrollState::Enrolled);
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::SignalCompletion(Ok(())))));
    }

    #[test]
    fn happy_path_slave_reaches_enrolled() {
        let c = ctx(false);
        let connect = CdapMessage::request(CdapOpCode::MConnect, "", 1);
        let (state, _) = transition(EnrollState::None, FsmEvent::Recv(connect), &c);
        assert_eq!(state, EnrollState::SWaitStart);

        let start_obj = EnrollmentObject {
            name: Name::new("initiator"),
            address: 0,
            lower_difs: vec!["L".into()],
        };
        let start = CdapMessage::request(CdapOpCode::MStart, OBJ_ENROLLMENT, 1)
            .with_class(CLASS_ENROLLMENT)
            .with_object(&start_obj)
            .unwrap();
        let (state, actions) = transition(state, FsmEvent::Recv(start), &c);
        assert_eq!(state, EnrollState::SWaitStopR);
        assert!(actions.iter().any(|a| matches!(a, FsmAction::RecordCandidate(_, _))));

        let stop_r = CdapMessage::request(CdapOpCode::MStopR, OBJ_STATUS, 1);
        let (state, actions) = transition(state, FsmEvent::Recv(stop_r), &c);
        assert_eq!(state, EnrollState::Enrolled);
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::SignalCompletion(Ok(())))));
    }

    #[test]
    fn timeout_retries_while_attempts_remain() {
        let c = ctx(true);
        let (state, actions) = transition(EnrollState::IWaitConnectR, FsmEvent::EnrollTimeout, &c);
        assert_eq!(state, EnrollState::None);
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::Abort { retry: true })));
    }

    #[test]
    fn timeout_gives_up_after_max_attempts() {
        let mut c = ctx(true);
        c.enroll_attempts = 2;
        let (_, actions) = transition(EnrollState::IWaitConnectR, FsmEvent::EnrollTimeout, &c);
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::Abort { retry: false })));
    }

    #[test]
    fn i_wait_start_aborts_with_protocol_violation() {
        let c = ctx(true);
        let msg = CdapMessage::request(CdapOpCode::MStart, OBJ_STATUS, 1);
        let (state, actions) = transition(EnrollState::IWaitStart, FsmEvent::Recv(msg), &c);
        assert_eq!(state, EnrollState::None);
        assert!(actions.iter().any(|a| matches!(
            a,
            FsmAction::SignalCompletion(Err(EnrollmentError::ProtocolViolation(_)))
        )));
    }

    #[test]
    fn enrolled_forwards_non_status_messages_to_rib() {
        let c = ctx(true);
        let msg = CdapMessage::request(CdapOpCode::MCreate, "/dif/mgmt/fa/dft", 5);
        let (state, actions) = transition(EnrollState::Enrolled, FsmEvent::Recv(msg), &c);
        assert_eq!(state, EnrollState::Enrolled);
        assert!(actions.iter().any(|a| matches!(a, FsmAction::ForwardToRib(_))));
    }

    #[test]
    fn enrolled_treats_status_start_as_noop() {
        let c = ctx(true);
        let msg = CdapMessage::request(CdapOpCode::MStart, OBJ_STATUS, 5);
        let (state, actions) = transition(EnrollState::Enrolled, FsmEvent::Recv(msg), &c);
        assert_eq!(state, EnrollState::Enrolled);
        assert!(actions.is_empty());
    }

    #[test]
    fn initiator_state_predicate_matches_i_states() {
        assert!(EnrollState::IWaitConnectR.is_initiator_state());
        assert!(!EnrollState::SWaitStart.is_initiator_state());
        assert!(EnrollState::SWaitStart.is_slave_state());
    }
}
