// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! shim-udp4 (§4.5): one IPC process per registered local application, each
//! bound to a UDP socket resolved from the application's name via DNS
//! (`Name::to_hostname`) on the well-known port 0x0D1F. A flow is not
//! established by any handshake the peer has to agree to — the first
//! datagram from a new remote socket address *is* the flow-allocation
//! request, synthesised up to the event loop as [`KernelMessage::FaReqArrived`];
//! only once the event loop answers with a matching `FaResp` does the
//! endpoint become "anchored" to that remote address and subsequent
//! datagrams start flowing up as `SduRecv` (§9 Design Note).
//!
//! Grounded in the teacher's blocking `UdpShim`/`AddressMapper`
//! (`examples/anirbanbasu-ari/src/shim.rs`), rewritten onto
//! `tokio::net::UdpSocket` and split into a handle (`ShimUdp4`, cheap to
//! clone, implements [`super::Shim`]) and a background dispatcher task that
//! owns all mutable state — the same actor/handle split the teacher uses
//! for `RibActor`/`RibHandle` in `actors.rs`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use crate::error::ShimError;
use crate::kernel::KernelMessage;
use crate::name::Name;

use super::{Shim, ShimChannel};

/// Well-known shim-udp4 rendezvous port (§4.5).
pub const UDP4_PORT: u16 = 0x0D1F;

/// Maximum single-datagram size this shim will read.
const MAX_DATAGRAM: usize = 65536;

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
        src_appl: Name,
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
    AcceptPending {
        port_id: u32,
        accept: bool,
    },
    Inbound {
        local_app: String,
        bytes: Vec<u8>,
        src: SocketAddr,
    },
}

/// An established or pending remote endpoint.
struct Endpoint {
    local_app: String,
    remote: SocketAddr,
    /// Not yet confirmed by a `FaResp`/`AcceptPending` — datagrams from
    /// this remote are dropped (beyond the rendezvous probe) until then.
    anchored: bool,
}

/// Cheap-to-clone handle to a running shim-udp4 instance. The real state
/// lives in the [`Dispatcher`] task spawned by [`ShimUdp4::spawn`].
#[derive(Clone)]
pub struct ShimUdp4 {
    dif_name: String,
    cmd_tx: mpsc::Sender<Command>,
}

impl ShimUdp4 {
    /// Spawns the dispatcher task and returns the handle plus the up-call
    /// channel the event loop should poll alongside its other select arms.
    pub fn spawn(dif_name: impl Into<String>) -> (Self, ShimChannel) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (up_tx, up_rx) = mpsc::channel(256);
        let dispatcher = Dispatcher {
            sockets: HashMap::new(),
            endpoints: HashMap::new(),
            remote_index: HashMap::new(),
            next_port: 1,
            up_tx,
            cmd_tx: cmd_tx.clone(),
        };
        tokio::spawn(dispatcher.run(cmd_rx));
        (
            ShimUdp4 {
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

    /// Resolves the pending rendezvous for `port_id` (a prior
    /// `FaReqArrived`) one way or the other. Called by the event loop once
    /// it has decided whether to accept the synthesised flow.
    pub async fn accept_pending(&self, port_id: u32, accept: bool) {
        let _ = self.cmd_tx.send(Command::AcceptPending { port_id, accept }).await;
    }
}

impl Shim for ShimUdp4 {
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

    async fn allocate(&self, src_appl: &Name, dst_appl: &Name) -> Result<u32, ShimError> {
        self.call(|resp| Command::Allocate {
            src_appl: src_appl.clone(),
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
        self.accept_pending(port_id, accept).await
    }
}

struct Dispatcher {
    sockets: HashMap<String, Arc<UdpSocket>>,
    endpoints: HashMap<u32, Endpoint>,
    remote_index: HashMap<(String, SocketAddr), u32>,
    next_port: u32,
    up_tx: mpsc::Sender<KernelMessage>,
    cmd_tx: mpsc::Sender<Command>,
}

impl Dispatcher {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            self.handle(cmd).await;
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { name, resp } => {
                let _ = resp.send(self.register(name).await);
            }
            Command::Unregister { name, resp } => {
                let canonical = name.canonical();
                let removed = self.sockets.remove(&canonical).is_some();
                self.endpoints.retain(|_, ep| ep.local_app != canonical);
                self.remote_index.retain(|(app, _), _| app != &canonical);
                let _ = resp.send(if removed {
                    Ok(())
                } else {
                    Err(ShimError::PeerNotRegistered(0))
                });
            }
            Command::Allocate {
                src_appl,
                dst_appl,
                resp,
            } => {
                let _ = resp.send(self.allocate(src_appl, dst_appl).await);
            }
            Command::Send {
                port_id,
                bytes,
                resp,
            } => {
                let _ = resp.send(self.send(port_id, bytes).await);
            }
            Command::Deallocate { port_id, resp } => {
                let _ = resp.send(self.deallocate(port_id));
            }
            Command::AcceptPending { port_id, accept } => {
                self.accept_pending(port_id, accept);
            }
            Command::Inbound {
                local_app,
                bytes,
                src,
            } => {
                self.on_datagram(local_app, bytes, src).await;
            }
        }
    }

    async fn register(&mut self, name: Name) -> Result<(), ShimError> {
        let canonical = name.canonical();
        if self.sockets.contains_key(&canonical) {
            return Err(ShimError::AlreadyRegistered(canonical));
        }
        let hostname = name.to_hostname();
        let mut addrs = tokio::net::lookup_host((hostname.as_str(), UDP4_PORT))
            .await
            .map_err(|e| ShimError::ResolutionFailed(e.to_string()))?;
        let bind_addr = addrs
            .next()
            .ok_or_else(|| ShimError::ResolutionFailed(hostname.clone()))?;
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| ShimError::BindFailed(e.to_string()))?;
        let socket = Arc::new(socket);
        self.sockets.insert(canonical.clone(), socket.clone());
        tokio::spawn(recv_loop(canonical, socket, self.cmd_tx.clone()));
        Ok(())
    }

    async fn allocate(&mut self, src_appl: Name, dst_appl: Name) -> Result<u32, ShimError> {
        let src_canonical = src_appl.canonical();
        let socket = self
            .sockets
            .get(&src_canonical)
            .cloned()
            .ok_or_else(|| ShimError::PeerNotRegistered(0))?;
        let hostname = dst_appl.to_hostname();
        let mut addrs = tokio::net::lookup_host((hostname.as_str(), UDP4_PORT))
            .await
            .map_err(|e| ShimError::ResolutionFailed(e.to_string()))?;
        let remote = addrs
            .next()
            .ok_or_else(|| ShimError::ResolutionFailed(hostname))?;
        // A rendezvous probe; the peer's recv loop turns this into its own
        // synthesised FaReqArrived. We anchor our own endpoint immediately
        // since we are the one initiating.
        socket
            .send_to(&[], remote)
            .await
            .map_err(|e| ShimError::SendFailed(e.to_string()))?;
        let port_id = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(1);
        self.endpoints.insert(
            port_id,
            Endpoint {
                local_app: src_canonical.clone(),
                remote,
                anchored: true,
            },
        );
        self.remote_index.insert((src_canonical, remote), port_id);
        Ok(port_id)
    }

    async fn send(&self, port_id: u32, bytes: Vec<u8>) -> Result<(), ShimError> {
        let ep = self
            .endpoints
            .get(&port_id)
            .ok_or(ShimError::PortNotFound(port_id))?;
        let socket = self
            .sockets
            .get(&ep.local_app)
            .ok_or(ShimError::PortNotFound(port_id))?;
        socket
            .send_to(&bytes, ep.remote)
            .await
            .map_err(|e| ShimError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn deallocate(&mut self, port_id: u32) -> Result<(), ShimError> {
        let ep = self
            .endpoints
            .remove(&port_id)
            .ok_or(ShimError::PortNotFound(port_id))?;
        self.remote_index.remove(&(ep.local_app, ep.remote));
        Ok(())
    }

    fn accept_pending(&mut self, port_id: u32, accept: bool) {
        if accept {
            if let Some(ep) = self.endpoints.get_mut(&port_id) {
                ep.anchored = true;
            }
        } else if let Some(ep) = self.endpoints.remove(&port_id) {
            self.remote_index.remove(&(ep.local_app, ep.remote));
        }
    }

    async fn on_datagram(&mut self, local_app: String, bytes: Vec<u8>, src: SocketAddr) {
        if let Some(&port_id) = self.remote_index.get(&(local_app.clone(), src)) {
            let anchored = self.endpoints.get(&port_id).map(|e| e.anchored).unwrap_or(false);
            if anchored && !bytes.is_empty() {
                let _ = self
                    .up_tx
                    .send(KernelMessage::SduRecv { port_id, bytes })
                    .await;
            }
            return;
        }
        // New remote: synthesise a flow-allocation request (§9 Design Note).
        // The peer name is unknowable from a bare UDP datagram, so the
        // source application is represented by its socket address until
        // enrolment/CDAP supplies the real peer name.
        let port_id = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(1);
        self.endpoints.insert(
            port_id,
            Endpoint {
                local_app: local_app.clone(),
                remote: src,
                anchored: false,
            },
        );
        self.remote_index.insert((local_app.clone(), src), port_id);
        let _ = self
            .up_tx
            .send(KernelMessage::FaReqArrived {
                event_id: port_id,
                port_id,
                src_appl: Name::new(src.to_string()),
                dst_appl: Name::from(local_app.as_str()),
            })
            .await;
    }
}

async fn recv_loop(local_app: String, socket: Arc<UdpSocket>, cmd_tx: mpsc::Sender<Command>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, src)) => {
                let bytes = buf[..n].to_vec();
                if cmd_tx
                    .send(Command::Inbound {
                        local_app: local_app.clone(),
                        bytes,
                        src,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Names resolve to loopback literals so `lookup_host` never needs real
    // DNS: two distinct addresses in 127.0.0.0/8 give each registration its
    // own socket without any external network dependency.

    #[tokio::test]
    async fn register_then_allocate_produces_a_port_id_and_a_rendezvous_datagram() {
        let (alice, _alice_chan) = ShimUdp4::spawn("shim-udp4");
        let (bob, mut bob_chan) = ShimUdp4::spawn("shim-udp4");

        alice
            .register(Name::new("127.0.0.11"))
            .await
            .expect("register alice");
        bob.register(Name::new("127.0.0.12"))
            .await
            .expect("register bob");

        let port = alice
            .allocate(&Name::new("127.0.0.11"), &Name::new("127.0.0.12"))
            .await
            .expect("allocate");
        assert!(port > 0);

        let up = tokio::time::timeout(std::time::Duration::from_secs(2), bob_chan.from_shim.recv())
            .await
            .expect("no timeout")
            .expect("channel open");
        assert!(matches!(up, KernelMessage::FaReqArrived { .. }));
    }

    #[tokio::test]
    async fn double_registration_of_the_same_name_is_rejected() {
        let (shim, _chan) = ShimUdp4::spawn("shim-udp4");
        shim.register(Name::new("127.0.0.13")).await.unwrap();
        let err = shim.register(Name::new("127.0.0.13")).await.unwrap_err();
        assert!(matches!(err, ShimError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn sending_on_an_unknown_port_fails() {
        let (shim, _chan) = ShimUdp4::spawn("shim-udp4");
        let err = shim.send(99, vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ShimError::PortNotFound(99)));
    }
}
