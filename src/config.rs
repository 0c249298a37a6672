// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Configuration management for IPCP instances.
//!
//! Supports both command-line arguments and TOML configuration files.
//! Handles bootstrap vs. member IPCP modes with appropriate parameters.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// IPCP operational mode (§4.3): a bootstrap IPCP starts ENROLLED-by-fiat
/// with a static address; a member IPCP initiates enrolment against one
/// or more bootstrap peers to obtain one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IpcpMode {
    Bootstrap,
    Member,
}

impl std::fmt::Display for IpcpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcpMode::Bootstrap => write!(f, "bootstrap"),
            IpcpMode::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for IpcpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bootstrap" => Ok(IpcpMode::Bootstrap),
            "member" => Ok(IpcpMode::Member),
            _ => Err(format!("invalid mode: {s}. use 'bootstrap' or 'member'")),
        }
    }
}

/// Which shim backs this IPCP's single lower DIF (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ShimKind {
    Udp4,
    Hv,
}

impl std::fmt::Display for ShimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShimKind::Udp4 => write!(f, "udp4"),
            ShimKind::Hv => write!(f, "hv"),
        }
    }
}

/// Command-line arguments for an IPCP instance.
#[derive(Parser, Debug)]
#[command(name = "ari-ipcp")]
#[command(author = "ARI Contributors")]
#[command(version = "0.1.0")]
#[command(about = "RINA normal IPC process", long_about = None)]
pub struct CliArgs {
    /// Path to a TOML configuration file (overrides other arguments).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// IPCP name (application-process name within the DIF).
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Operating mode.
    #[arg(long, value_name = "MODE", default_value = "member")]
    pub mode: IpcpMode,

    /// DIF name to join.
    #[arg(long, value_name = "DIF")]
    pub dif_name: Option<String>,

    /// RINA address (required for bootstrap mode).
    #[arg(long, value_name = "ADDRESS")]
    pub address: Option<u64>,

    /// Lower DIF (shim) this IPCP runs over.
    #[arg(long, value_name = "KIND", default_value = "udp4")]
    pub shim_kind: ShimKind,

    /// Names of the lower DIFs (shim instances) this IPCP can reach
    /// candidates over (§4.4 Neighbor-Candidate merge rule); also carried
    /// on the enrolment object's `lower_difs` field (§4.3 transitions 3/4).
    #[arg(long, value_name = "DIFS", value_delimiter = ',')]
    pub lower_difs: Option<Vec<String>>,

    /// Bootstrap peer application names for enrollment (member mode only).
    #[arg(long, value_name = "PEERS", value_delimiter = ',')]
    pub bootstrap_peers: Option<Vec<String>>,

    /// Address pool start (bootstrap mode only).
    #[arg(long, value_name = "ADDRESS", default_value = "1002")]
    pub address_pool_start: u64,

    /// Address pool end (bootstrap mode only).
    #[arg(long, value_name = "ADDRESS", default_value = "1999")]
    pub address_pool_end: u64,

    /// Path of the Unix-domain local configuration socket (§6 SUPPLEMENT).
    #[arg(long, value_name = "PATH", default_value = "/tmp/ari-ipcp.sock")]
    pub control_socket_path: PathBuf,
}

/// Bootstrap peer configuration: an application name resolvable by the
/// configured shim (a DNS hostname for shim-udp4, a channel identifier
/// for shim-hv).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapPeer {
    pub name: String,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub ipcp: IpcpConfig,
    pub dif: DifConfig,
    pub shim: ShimConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
}

/// IPCP section of config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcpConfig {
    pub name: String,
    pub mode: IpcpMode,
    #[serde(default = "default_control_socket_path")]
    pub control_socket_path: String,
}

fn default_control_socket_path() -> String {
    "/tmp/ari-ipcp.sock".to_string()
}

/// DIF section of config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifConfig {
    pub name: String,
    /// Only meaningful for bootstrap mode.
    pub address: Option<u64>,
    #[serde(default)]
    pub address_pool_start: Option<u64>,
    #[serde(default)]
    pub address_pool_end: Option<u64>,
    /// Names of the lower DIFs (shim instances) this IPCP can reach
    /// candidates over (§4.4 Neighbor-Candidate merge rule).
    #[serde(default)]
    pub lower_difs: Vec<String>,
}

/// Shim layer section of config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    pub kind: ShimKind,
}

/// Enrollment section of config: only the bootstrap peer list is
/// configurable, since the timing constants (`ENROLL_TO`, `MAX_ATTEMPTS`,
/// `KEEPALIVE_INTVAL`, `KEEPALIVE_THRESH`) are fixed by the protocol
/// itself (§4.2, §4.3) rather than deployment-tunable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnrollmentConfig {
    #[serde(default)]
    pub bootstrap_peers: Vec<BootstrapPeer>,
}

/// Unified configuration after parsing CLI or file.
#[derive(Debug, Clone)]
pub struct IpcpConfiguration {
    pub name: String,
    pub mode: IpcpMode,
    pub dif_name: String,
    pub address: Option<u64>,
    pub shim_kind: ShimKind,
    pub lower_difs: Vec<String>,
    pub bootstrap_peers: Vec<String>,
    pub address_pool_start: u64,
    pub address_pool_end: u64,
    pub control_socket_path: PathBuf,
}

impl IpcpConfiguration {
    /// Creates configuration from command-line arguments.
    pub fn from_cli(args: CliArgs) -> Result<Self, String> {
        if let Some(config_path) = args.config {
            return Self::from_file(&config_path);
        }

        let name = args.name.ok_or("--name is required")?;
        let dif_name = args.dif_name.ok_or("--dif-name is required")?;
        let lower_difs = args.lower_difs.unwrap_or_default();

        match args.mode {
            IpcpMode::Bootstrap => {
                let address = args.address.ok_or("--address is required for bootstrap mode")?;
                Ok(Self {
                    name,
                    mode: IpcpMode::Bootstrap,
                    dif_name,
                    address: Some(address),
                    shim_kind: args.shim_kind,
                    lower_difs,
                    bootstrap_peers: vec![],
                    address_pool_start: args.address_pool_start,
                    address_pool_end: args.address_pool_end,
                    control_socket_path: args.control_socket_path,
                })
            }
            IpcpMode::Member => {
                let peers = args
                    .bootstrap_peers
                    .ok_or("--bootstrap-peers is required for member mode")?;
                Ok(Self {
                    name,
                    mode: IpcpMode::Member,
                    dif_name,
                    address: None,
                    shim_kind: args.shim_kind,
                    lower_difs,
                    bootstrap_peers: peers,
                    address_pool_start: args.address_pool_start,
                    address_pool_end: args.address_pool_end,
                    control_socket_path: args.control_socket_path,
                })
            }
        }
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &PathBuf) -> Result<Self, String> {
        let contents =
            fs::read_to_string(path).map_err(|e| format!("failed to read config file: {e}"))?;
        let config: TomlConfig =
            toml::from_str(&contents).map_err(|e| format!("failed to parse TOML config: {e}"))?;

        let bootstrap_peers = config
            .enrollment
            .bootstrap_peers
            .iter()
            .map(|peer| peer.name.clone())
            .collect();

        Ok(Self {
            name: config.ipcp.name,
            mode: config.ipcp.mode,
            dif_name: config.dif.name,
            address: config.dif.address,
            shim_kind: config.shim.kind,
            lower_difs: config.dif.lower_difs,
            bootstrap_peers,
            address_pool_start: config.dif.address_pool_start.unwrap_or(1002),
            address_pool_end: config.dif.address_pool_end.unwrap_or(1999),
            control_socket_path: PathBuf::from(config.ipcp.control_socket_path),
        })
    }

    /// Validates configuration based on mode.
    pub fn validate(&self) -> Result<(), String> {
        match self.mode {
            IpcpMode::Bootstrap => {
                if self.address.is_none() {
                    return Err("bootstrap mode requires an address".to_string());
                }
            }
            IpcpMode::Member => {
                if self.bootstrap_peers.is_empty() {
                    return Err("member mode requires at least one bootstrap peer".to_string());
                }
            }
        }
        if self.address_pool_start > self.address_pool_end {
            return Err("address_pool_start must not exceed address_pool_end".to_string());
        }
        Ok(())
    }

    /// Prints a configuration summary (teacher's `print_summary` convention).
    pub fn print_summary(&self) {
        println!("=== IPCP Configuration ===");
        println!("Name: {}", self.name);
        println!("Mode: {}", self.mode);
        println!("DIF: {}", self.dif_name);
        println!("Shim: {}", self.shim_kind);

        if let Some(addr) = self.address {
            println!("RINA Address: {addr}");
        }
        if !self.bootstrap_peers.is_empty() {
            println!("Bootstrap Peers: {:?}", self.bootstrap_peers);
        }
        if self.mode == IpcpMode::Bootstrap {
            println!("Address Pool: {}-{}", self.address_pool_start, self.address_pool_end);
        }
        println!("Control Socket: {}", self.control_socket_path.display());
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipcp_mode_parses_from_str() {
        assert_eq!("bootstrap".parse::<IpcpMode>().unwrap(), IpcpMode::Bootstrap);
        assert_eq!("member".parse::<IpcpMode>().unwrap(), IpcpMode::Member);
        assert!("invalid".parse::<IpcpMode>().is_err());
    }

    #[test]
    fn bootstrap_without_address_fails_validation() {
        let cfg = IpcpConfiguration {
            name: "a".into(),
            mode: IpcpMode::Bootstrap,
            dif_name: "dif".into(),
            address: None,
            shim_kind: ShimKind::Udp4,
            lower_difs: vec![],
            bootstrap_peers: vec![],
            address_pool_start: 1000,
            address_pool_end: 2000,
            control_socket_path: PathBuf::from("/tmp/x.sock"),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn member_without_bootstrap_peers_fails_validation() {
        let cfg = IpcpConfiguration {
            name: "a".into(),
            mode: IpcpMode::Member,
            dif_name: "dif".into(),
            address: None,
            shim_kind: ShimKind::Udp4,
            lower_difs: vec![],
            bootstrap_peers: vec![],
            address_pool_start: 1000,
            address_pool_end: 2000,
            control_socket_path: PathBuf::from("/tmp/x.sock"),
        };
        assert!(cfg.validate().is_err());
    }
}
