// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Local configuration socket (§6 SUPPLEMENT): a Unix-domain stream
//! socket accepting enrol/register/create/destroy/dump-rib commands from
//! a CLI, framed the same way as the kernel control channel ([`crate::kernel`]:
//! a 4-byte little-endian length prefix followed by a [`postcard`]-encoded
//! message). This module owns the listener and the command dispatch; it
//! does not ship an interactive client (that remains the Non-goal CLI
//! tool of §1).

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::error::KernelError;
use crate::name::Name;

/// Frames larger than this are rejected rather than trusted to allocate
/// (mirrors [`crate::kernel::MAX_FRAME_LEN`]).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One command accepted from the local configuration socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalCommand {
    /// Initiate enrolment against `peer`, over the IPCP's single
    /// configured lower DIF (shim instance).
    Enroll { peer: Name },
    /// Register or unregister a local application name.
    ApplRegister { name: Name, register: bool },
    /// Create a generic RIB object (§4.4's `ObjectStore`).
    CreateObject {
        name: String,
        class: String,
        value: crate::rib::RibValue,
    },
    /// Destroy a generic RIB object.
    DestroyObject { name: String },
    /// Dump the local RIB (DFT, LFDB, Neighbor-Candidates, Neighbors) as
    /// human-inspectable JSON, for an operator attached to the control
    /// socket.
    DumpRib,
}

/// Reply to a [`LocalCommand`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalResponse {
    Ok,
    /// "enrolment aborted" and friends (§7 user-visible failures).
    Err(String),
    /// Pretty-printed JSON RIB snapshot, answering [`LocalCommand::DumpRib`].
    RibDump(String),
}

async fn read_frame<R: AsyncRead + Unpin, T: for<'de> Deserialize<'de>>(
    reader: &mut R,
) -> Result<Option<T>, KernelError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(KernelError::Codec(e.to_string())),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(KernelError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| KernelError::Truncated {
            expected: len,
            actual: 0,
        })?;
    postcard::from_bytes(&payload)
        .map(Some)
        .map_err(|e| KernelError::Codec(e.to_string()))
}

async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> Result<(), KernelError> {
    let payload = postcard::to_allocvec(msg).map_err(|e| KernelError::Codec(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(KernelError::FrameTooLarge(payload.len()));
    }
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);
    writer
        .write_all(&framed)
        .await
        .map_err(|e| KernelError::Codec(e.to_string()))?;
    writer.flush().await.map_err(|e| KernelError::Codec(e.to_string()))
}

/// A decoded command paired with the channel its response must travel
/// back over, handed to whatever owns the IPCP's command queue.
pub struct LocalRequest {
    pub command: LocalCommand,
    pub respond: oneshot::Sender<LocalResponse>,
}

/// Accepts connections on `path` and forwards each decoded command to
/// `dispatch`, one connection handled per spawned task, one command per
/// connection (the CLI is expected to connect, send one command, and read
/// one response, matching the reference's synchronous control-socket
/// protocol).
pub async fn serve(
    path: impl AsRef<std::path::Path>,
    dispatch: mpsc::Sender<LocalRequest>,
) -> Result<(), KernelError> {
    let path = path.as_ref();
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).map_err(|e| KernelError::Codec(e.to_string()))?;
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| KernelError::Codec(e.to_string()))?;
        let dispatch = dispatch.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, dispatch).await {
                tracing::warn!(error = %e, "local control connection failed");
            }
        });
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    dispatch: mpsc::Sender<LocalRequest>,
) -> Result<(), KernelError> {
    let Some(command) = read_frame::<_, LocalCommand>(&mut stream).await? else {
        return Ok(());
    };
    let (respond, recv) = oneshot::channel();
    if dispatch.send(LocalRequest { command, respond }).await.is_err() {
        write_frame(
            &mut stream,
            &LocalResponse::Err("IPCP event loop unavailable".into()),
        )
        .await?;
        return Ok(());
    }
    let response = recv
        .await
        .unwrap_or_else(|_| LocalResponse::Err("IPCP dropped the request".into()));
    write_frame(&mut stream, &response).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_round_trips_over_an_in_memory_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let cmd = LocalCommand::Enroll {
            peer: Name::new("peer"),
        };
        write_frame(&mut a, &cmd).await.unwrap();
        let decoded: LocalCommand = read_frame(&mut b).await.unwrap().unwrap();
        match decoded {
            LocalCommand::Enroll { peer } => assert_eq!(peer, Name::new("peer")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, &LocalResponse::Err("enrolment aborted".into()))
            .await
            .unwrap();
        let decoded: LocalResponse = read_frame(&mut b).await.unwrap().unwrap();
        assert!(matches!(decoded, LocalResponse::Err(s) if s == "enrolment aborted"));
    }

    #[tokio::test]
    async fn end_to_end_over_a_real_unix_socket() {
        let dir = std::env::temp_dir().join(format!("ari-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("ari-control-test.sock");
        let _ = std::fs::remove_file(&path);

        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(8);
        let serve_path = path.clone();
        tokio::spawn(async move {
            let _ = serve(serve_path, dispatch_tx).await;
        });
        tokio::spawn(async move {
            if let Some(req) = dispatch_rx.recv().await {
                let _ = req.respond.send(LocalResponse::Ok);
            }
        });

        // give the listener a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        write_frame(
            &mut stream,
            &LocalCommand::ApplRegister {
                name: Name::new("foo"),
                register: true,
            },
        )
        .await
        .unwrap();
        let resp: LocalResponse = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(resp, LocalResponse::Ok));
    }
}
