// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Error types for ARI
//!
//! This module provides typed errors for all RINA components,
//! replacing string-based errors with structured error types.

use thiserror::Error;

/// Main error type for ARI operations
#[derive(Error, Debug)]
pub enum AriError {
    #[error("enrolment error: {0}")]
    Enrollment(#[from] EnrollmentError),

    #[error("RIB error: {0}")]
    Rib(#[from] RibError),

    #[error("shim error: {0}")]
    Shim(#[from] ShimError),

    #[error("CDAP error: {0}")]
    Cdap(#[from] CdapError),

    #[error("event loop error: {0}")]
    EventLoop(#[from] EventLoopError),

    #[error("kernel channel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,

    #[error("operation timed out")]
    Timeout,
}

/// Enrolment-specific errors (§7 Error Handling Design).
#[derive(Error, Debug, Clone)]
pub enum EnrollmentError {
    #[error("enrolment rejected: {0}")]
    Rejected(String),

    #[error("enrolment timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("no such neighbour: {0}")]
    NoSuchNeighbor(String),

    #[error("no such neighbour flow: port {0}")]
    NoSuchFlow(u32),
}

/// RIB-specific errors
#[derive(Error, Debug, Clone)]
pub enum RibError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("invalid object class: {0}")]
    InvalidClass(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("RIB operation failed: {0}")]
    OperationFailed(String),

    #[error("address pool exhausted ({pool_start}-{pool_end})")]
    AddressPoolExhausted { pool_start: u64, pool_end: u64 },
}

/// Shim-layer errors (shim-hv and shim-udp4).
#[derive(Error, Debug, Clone)]
pub enum ShimError {
    #[error("failed to bind: {0}")]
    BindFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("name resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("peer not registered: {0}")]
    PeerNotRegistered(u64),

    #[error("socket closed")]
    SocketClosed,

    #[error("hypervisor channel {0} not bound")]
    ChannelNotBound(u32),

    #[error("port {0} not found")]
    PortNotFound(u32),

    #[error("application name {0} already registered")]
    AlreadyRegistered(String),

    #[error("peer rejected the flow-allocation request")]
    OperationRejected,
}

/// CDAP-specific errors
#[derive(Error, Debug, Clone)]
pub enum CdapError {
    #[error("invalid operation code: {0}")]
    InvalidOpCode(u8),

    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("invoke ID mismatch: expected {expected}, got {actual}")]
    InvokeIdMismatch { expected: u64, actual: u64 },

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("session error: {0}")]
    SessionError(String),
}

/// Event loop errors: timer bookkeeping, request/response correlation,
/// kernel/local-socket channel lifecycle.
#[derive(Error, Debug, Clone)]
pub enum EventLoopError {
    #[error("kernel control channel closed")]
    KernelChannelClosed,

    #[error("request {0} timed out")]
    RequestTimeout(u32),

    #[error("no pending request for event id {0}")]
    UnknownEventId(u32),

    #[error("local configuration socket error: {0}")]
    LocalSocket(String),
}

/// Kernel control channel codec errors (§6).
#[derive(Error, Debug, Clone)]
pub enum KernelError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("codec error: {0}")]
    Codec(String),
}

/// Serialization/deserialization errors
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("postcard serialization failed: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid data format: {0}")]
    InvalidFormat(String),
}

impl From<String> for AriError {
    fn from(s: String) -> Self {
        AriError::Config(s)
    }
}

impl From<&str> for AriError {
    fn from(s: &str) -> Self {
        AriError::Config(s.to_string())
    }
}
