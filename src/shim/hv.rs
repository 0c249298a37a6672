// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! shim-hv (§4.5): one hypervisor message channel per shim instance,
//! channel 0 reserved for control (FA_REQ/FA_RESP), channel `port + 1`
//! carrying the SDUs of flow `port`. Grounded in the reference's
//! `kernel/shim-hv.c` / `shim-hv-msg.h` wire layout (§6 SUPPLEMENT), but
//! the actual transport — what carries channel-tagged messages between
//! this process and the hypervisor side — is behind the [`HvTransport`]
//! trait so no real VMPI/virtio dependency needs to exist for this crate
//! to implement the protocol; a test harness supplies an in-memory pair.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::ShimError;
use crate::kernel::KernelMessage;
use crate::name::Name;

use super::{Shim, ShimChannel};

/// Channel 0 is reserved for FA_REQ/FA_RESP control traffic; data for port
/// `p` travels on channel `p + 1`.
pub const CONTROL_CHANNEL: u32 = 0;

/// Abstraction over the hypervisor message channel, analogous to the
/// reference's VMPI endpoint selected by a `vmpi-id`-like parameter. One
/// implementation wraps whatever real transport a deployment provides;
/// [`tests::DuplexHvTransport`] supplies an in-memory pair for unit tests.
pub trait HvTransport: Send + Sync + 'static {
    fn send(
        &self,
        channel: u32,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), ShimError>> + Send;

    fn recv(&self) -> impl std::future::Future<Output = Result<(u32, Vec<u8>), ShimError>> + Send;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FaReqWire {
    msg_type: u16,
    event_id: u32,
    src_port: u32,
    src_appl: Name,
    dst_appl: Name,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FaRespWire {
    msg_type: u16,
    event_id: u32,
    src_port: u32,
    dst_port: u32,
    response: u8,
}

const MSG_TYPE_FA_REQ: u16 = 1;
const MSG_TYPE_FA_RESP: u16 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum HvControl {
    Req(FaReqWire),
    Resp(FaRespWire),
}

enum Command {
    Register {
        name: Name,
        resp: oneshot::Sender<Result<(), ShimError>>,
    },
    Unregister {
        name: Name,
        resp: oneshot::Sender<Result<(), ShimError>>,
    },
    Allocate {
        dst_appl: Name,
        resp: oneshot::Sender<Result<u32, ShimError>>,
    },
    Send {
        port_id: u32,
        bytes: Vec<u8>,
        resp: oneshot::Sender<Result<(), ShimError>>,
    },
    Deallocate {
        port_id: u32,
        resp: oneshot::Sender<Result<(), ShimError>>,
    },
    /// Event-loop answer to an inbound `FaReqArrived` (§4.5).
    Respond {
        port_id: u32,
        accept: bool,
    },
}

/// Cheap-to-clone handle to a running shim-hv instance.
#[derive(Clone)]
pub struct ShimHv {
    dif_name: String,
    cmd_tx: mpsc::Sender<Command>,
}

impl ShimHv {
    pub fn spawn<T: HvTransport>(dif_name: impl Into<String>, transport: T) -> (Self, ShimChannel) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (up_tx, up_rx) = mpsc::channel(256);
        let dispatcher = Dispatcher {
            transport: Arc::new(transport),
            local_name: None,
            next_port: 1,
            next_event_id: 1,
            pending_requests: HashMap::new(),
            pending_inbound: HashMap::new(),
            ports: HashMap::new(),
            up_tx,
        };
        tokio::spawn(dispatcher.run(cmd_rx));
        (
            ShimHv {
                dif_name: dif_name.into(),
                cmd_tx,
            },
            ShimChannel { from_shim: up_rx },
        )
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ShimError>>) -> Command,
    ) -> Result<T, ShimError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(resp_tx))
            .await
            .map_err(|_| ShimError::SocketClosed)?;
        resp_rx.await.map_err(|_| ShimError::SocketClosed)?
    }

    /// Accepts or rejects a pending inbound flow surfaced as
    /// `FaReqArrived`, replying FA_RESP over the control channel.
    pub async fn respond(&self, port_id: u32, accept: bool) {
        let _ = self.cmd_tx.send(Command::Respond { port_id, accept }).await;
    }
}

impl Shim for ShimHv {
    fn dif_name(&self) -> &str {
        &self.dif_name
    }

    async fn register(&self, name: Name) -> Result<(), ShimError> {
        self.call(|resp| Command::Register { name, resp }).await
    }

    async fn unregister(&self, name: &Name) -> Result<(), ShimError> {
        self.call(|resp| Command::Unregister {
            name: name.clone(),
            resp,
        })
        .await
    }

    async fn allocate(&self, _src_appl: &Name, dst_appl: &Name) -> Result<u32, ShimError> {
        self.call(|resp| Command::Allocate {
            dst_appl: dst_appl.clone(),
            resp,
        })
        .await
    }

    async fn send(&self, port_id: u32, bytes: Vec<u8>) -> Result<(), ShimError> {
        self.call(|resp| Command::Send {
            port_id,
            bytes,
            resp,
        })
        .await
    }

    async fn deallocate(&self, port_id: u32) -> Result<(), ShimError> {
        self.call(|resp| Command::Deallocate { port_id, resp }).await
    }

    async fn accept(&self, port_id: u32, accept: bool) {
        self.respond(port_id, accept).await
    }
}

struct PendingRequest {
    resp: oneshot::Sender<Result<u32, ShimError>>,
    port_id: u32,
}

/// Owns all mutable shim-hv state and the transport handle; the only task
/// that ever touches either (§5: single-owner discipline).
struct Dispatcher<T: HvTransport> {
    transport: Arc<T>,
    local_name: Option<Name>,
    next_port: u32,
    next_event_id: u32,
    /// Outbound FA_REQs awaiting a FA_RESP, keyed by event-id.
    pending_requests: HashMap<u32, PendingRequest>,
    /// Inbound FA_REQs awaiting the event loop's accept/reject, keyed by
    /// the port-id surfaced in `FaReqArrived`.
    pending_inbound: HashMap<u32, (u32, Name)>,
    /// Confirmed open ports, mapped to the peer name they were opened
    /// with (best-effort; the far side of an accepted inbound request is
    /// recorded from its FA_REQ).
    ports: HashMap<u32, Name>,
    up_tx: mpsc::Sender<KernelMessage>,
}

impl<T: HvTransport> Dispatcher<T> {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => return,
                    }
                }
                inbound = self.transport.recv() => {
                    match inbound {
                        Ok((channel, bytes)) => self.handle_inbound(channel, bytes).await,
                        Err(_) => return,
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register { name, resp } => {
                let result = if self.local_name.is_some() {
                    Err(ShimError::AlreadyRegistered(name.canonical()))
                } else {
                    self.local_name = Some(name);
                    Ok(())
                };
                let _ = resp.send(result);
            }
            Command::Unregister { name, resp } => {
                let result = if self.local_name.as_ref() == Some(&name) {
                    self.local_name = None;
                    Ok(())
                } else {
                    Err(ShimError::PeerNotRegistered(0))
                };
                let _ = resp.send(result);
            }
            Command::Allocate { dst_appl, resp } => {
                let port_id = self.next_port;
                self.next_port = self.next_port.wrapping_add(1).max(1);
                let event_id = self.next_event_id;
                self.next_event_id = self.next_event_id.wrapping_add(1).max(1);
                let src_appl = self.local_name.clone().unwrap_or_else(|| Name::new(""));
                let wire = FaReqWire {
                    msg_type: MSG_TYPE_FA_REQ,
                    event_id,
                    src_port: port_id,
                    src_appl,
                    dst_appl,
                };
                let encoded = match postcard::to_allocvec(&HvControl::Req(wire)) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = resp.send(Err(ShimError::SendFailed(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = self.transport.send(CONTROL_CHANNEL, encoded).await {
                    let _ = resp.send(Err(e));
                    return;
                }
                self.pending_requests
                    .insert(event_id, PendingRequest { resp, port_id });
            }
            Command::Send {
                port_id,
                bytes,
                resp,
            } => {
                let result = if self.ports.contains_key(&port_id) {
                    self.transport.send(port_id + 1, bytes).await
                } else {
                    Err(ShimError::PortNotFound(port_id))
                };
                let _ = resp.send(result);
            }
            Command::Deallocate { port_id, resp } => {
                let result = if self.ports.remove(&port_id).is_some() {
                    Ok(())
                } else {
                    Err(ShimError::PortNotFound(port_id))
                };
                let _ = resp.send(result);
            }
            Command::Respond { port_id, accept } => {
                self.respond(port_id, accept).await;
            }
        }
    }

    async fn respond(&mut self, port_id: u32, accept: bool) {
        let Some((event_id, peer)) = self.pending_inbound.remove(&port_id) else {
            return;
        };
        if accept {
            self.ports.insert(port_id, peer);
        }
        let wire = FaRespWire {
            msg_type: MSG_TYPE_FA_RESP,
            event_id,
            src_port: port_id,
            dst_port: port_id,
            response: if accept { 0 } else { 1 },
        };
        if let Ok(encoded) = postcard::to_allocvec(&HvControl::Resp(wire)) {
            let _ = self.transport.send(CONTROL_CHANNEL, encoded).await;
        }
    }

    async fn handle_inbound(&mut self, channel: u32, bytes: Vec<u8>) {
        if channel == CONTROL_CHANNEL {
            match postcard::from_bytes::<HvControl>(&bytes) {
                Ok(HvControl::Req(req)) => {
                    let port_id = req.src_port;
                    self.pending_inbound
                        .insert(port_id, (req.event_id, req.src_appl.clone()));
                    let _ = self
                        .up_tx
                        .send(KernelMessage::FaReqArrived {
                            event_id: req.event_id,
                            port_id,
                            src_appl: req.src_appl,
                            dst_appl: req.dst_appl,
                        })
                        .await;
                }
                Ok(HvControl::Resp(resp)) => {
                    if let Some(pending) = self.pending_requests.remove(&resp.event_id) {
                        if resp.response == 0 {
                            self.ports.insert(pending.port_id, Name::new("peer"));
                            let _ = pending.resp.send(Ok(pending.port_id));
                        } else {
                            let _ = pending.resp.send(Err(ShimError::OperationRejected));
                        }
                    }
                }
                Err(_) => {}
            }
        } else {
            let port_id = channel - 1;
            if self.ports.contains_key(&port_id) {
                let _ = self
                    .up_tx
                    .send(KernelMessage::SduRecv { port_id, bytes })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// In-memory pair of `HvTransport`s, each side's outbound queue being
    /// the other's inbound queue — enough to exercise the control-plane
    /// handshake without any real hypervisor channel.
    pub struct DuplexHvTransport {
        outbound: mpsc::Sender<(u32, Vec<u8>)>,
        inbound: StdMutex<mpsc::Receiver<(u32, Vec<u8>)>>,
    }

    pub fn duplex_pair() -> (DuplexHvTransport, DuplexHvTransport) {
        let (a_tx, a_rx) = mpsc::channel(64);
        let (b_tx, b_rx) = mpsc::channel(64);
        (
            DuplexHvTransport {
                outbound: b_tx,
                inbound: StdMutex::new(a_rx),
            },
            DuplexHvTransport {
                outbound: a_tx,
                inbound: StdMutex::new(b_rx),
            },
        )
    }

    impl HvTransport for DuplexHvTransport {
        async fn send(&self, channel: u32, bytes: Vec<u8>) -> Result<(), ShimError> {
            self.outbound
                .send((channel, bytes))
                .await
                .map_err(|_| ShimError::SocketClosed)
        }

        async fn recv(&self) -> Result<(u32, Vec<u8>), ShimError> {
            // `recv` on `mpsc::Receiver` needs `&mut self`; the dispatcher
            // only ever calls this from one task at a time, so a std mutex
            // (never held across an await in the contended sense, since
            // there is exactly one caller) is enough to get `&self`.
            let mut guard = self.inbound.lock().unwrap();
            guard.recv().await.ok_or(ShimError::SocketClosed)
        }
    }

    #[tokio::test]
    async fn allocate_against_an_accepting_peer_completes_and_opens_a_port() {
        let (side_a, side_b) = duplex_pair();
        let (alice, _alice_chan) = ShimHv::spawn("shim-hv", side_a);
        let (bob, mut bob_chan) = ShimHv::spawn("shim-hv", side_b);

        alice.register(Name::new("alice")).await.unwrap();
        bob.register(Name::new("bob")).await.unwrap();

        let alice_handle = alice.clone();
        let allocate_task = tokio::spawn(async move {
            alice_handle
                .allocate(&Name::new("alice"), &Name::new("bob"))
                .await
        });

        let up = tokio::time::timeout(std::time::Duration::from_secs(2), bob_chan.from_shim.recv())
            .await
            .expect("no timeout")
            .expect("channel open");
        let port_id = match up {
            KernelMessage::FaReqArrived { port_id, .. } => port_id,
            other => panic!("unexpected up-call: {other:?}"),
        };
        bob.respond(port_id, true).await;

        let allocated = tokio::time::timeout(std::time::Duration::from_secs(2), allocate_task)
            .await
            .expect("no timeout")
            .expect("task joined")
            .expect("allocate succeeded");
        assert_eq!(allocated, port_id);
    }

    #[tokio::test]
    async fn rejecting_an_inbound_request_fails_the_allocate_call() {
        let (side_a, side_b) = duplex_pair();
        let (alice, _alice_chan) = ShimHv::spawn("shim-hv", side_a);
        let (bob, mut bob_chan) = ShimHv::spawn("shim-hv", side_b);

        alice.register(Name::new("alice")).await.unwrap();
        bob.register(Name::new("bob")).await.unwrap();

        let alice_handle = alice.clone();
        let allocate_task = tokio::spawn(async move {
            alice_handle
                .allocate(&Name::new("alice"), &Name::new("bob"))
                .await
        });

        let up = bob_chan.from_shim.recv().await.expect("channel open");
        let port_id = match up {
            KernelMessage::FaReqArrived { port_id, .. } => port_id,
            other => panic!("unexpected up-call: {other:?}"),
        };
        bob.respond(port_id, false).await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), allocate_task)
            .await
            .expect("no timeout")
            .expect("task joined");
        assert!(matches!(result, Err(ShimError::OperationRejected)));
    }
}
