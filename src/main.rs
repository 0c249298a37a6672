// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! `ari-ipcp`: runs one normal IPCP (§4.1) to completion. Parses its
//! configuration (CLI flags or a TOML file, §6 SUPPLEMENT), binds the
//! configured shim, serves the local configuration socket, and — for a
//! member-mode IPCP — fires off enrolment against every configured
//! bootstrap peer before handing control to the event loop.

use std::process::ExitCode;

use ari::config::{CliArgs, IpcpConfiguration, ShimKind};
use ari::control;
use ari::ipcp::Ipcp;
use ari::name::Name;
use ari::shim::udp4::ShimUdp4;
use ari::{LocalCommand, LocalResponse};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    let config = match IpcpConfiguration::from_cli(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return ExitCode::FAILURE;
    }
    config.print_summary();

    match config.shim_kind {
        ShimKind::Udp4 => run_udp4(config).await,
        ShimKind::Hv => {
            // Shim-hv's control-message protocol is implemented against
            // the `HvTransport` trait (§4.5), but the actual hypervisor
            // message channel it would run over is external to this
            // crate (§1 Non-goals: "packet encoding on the shim
            // transports"). This binary has no such transport to hand
            // it, so shim-hv is exercised only by the in-process
            // `DuplexHvTransport` in `ari::shim::hv`'s test suite.
            eprintln!(
                "shim-hv requires a hypervisor transport this binary does not provide; \
                 run with --shim-kind udp4, or embed `ari::shim::hv::ShimHv` directly \
                 with a concrete `HvTransport`"
            );
            ExitCode::FAILURE
        }
    }
}

async fn run_udp4(config: IpcpConfiguration) -> ExitCode {
    let (shim, shim_channel) = ShimUdp4::spawn("shim-udp4");
    let (ipcp, handle) = Ipcp::new(&config, shim, shim_channel);

    let socket_path = config.control_socket_path.clone();
    let dispatch = handle.command_sender();
    tokio::spawn(async move {
        if let Err(e) = control::serve(socket_path, dispatch).await {
            tracing::error!(error = %e, "local configuration socket stopped");
        }
    });

    let bootstrap_peers = config.bootstrap_peers.clone();
    let enroll_handle = handle.clone();
    tokio::spawn(async move {
        for peer in bootstrap_peers {
            let peer_name = Name::new(peer.clone());
            tracing::info!(peer, "enrolling against bootstrap peer");
            match enroll_handle
                .submit(LocalCommand::Enroll { peer: peer_name })
                .await
            {
                LocalResponse::Ok => tracing::info!(peer, "enrolment complete"),
                LocalResponse::Err(e) => tracing::warn!(peer, error = %e, "enrolment failed"),
            }
        }
    });

    match ipcp.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("IPCP event loop terminated: {e}");
            ExitCode::FAILURE
        }
    }
}
