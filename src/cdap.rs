// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP (Common Distributed Application Protocol) message codec.
//!
//! This module owns the "message codec" leaf of the dependency order: it
//! turns an opcode + named object into bytes and back. It knows nothing
//! about the RIB, enrolment state, or neighbours — those layers hand it a
//! [`CdapMessage`] to serialise, or receive one it has decoded, and decide
//! what to do with it.

use serde::{Deserialize, Serialize};

use crate::error::CdapError;

/// The eleven CDAP operation codes used by the enrolment handshake and RIB
/// object operations. `M_CONNECT`/`M_CONNECT_R`/`M_RELEASE` bracket a CDAP
/// session; `M_START`/`M_STOP` (and their `_R` replies) drive enrolment;
/// `M_CREATE`/`M_DELETE`/`M_READ` (and `M_READ_R`) operate on RIB objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CdapOpCode {
    MConnect,
    MConnectR,
    MRelease,
    MStart,
    MStartR,
    MStop,
    MStopR,
    MCreate,
    MDelete,
    MRead,
    MReadR,
}

impl CdapOpCode {
    /// True for the five opcodes that carry a response rather than
    /// initiating an exchange.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            CdapOpCode::MConnectR | CdapOpCode::MStartR | CdapOpCode::MStopR | CdapOpCode::MReadR
        )
    }
}

impl std::fmt::Display for CdapOpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CdapOpCode::MConnect => "M_CONNECT",
            CdapOpCode::MConnectR => "M_CONNECT_R",
            CdapOpCode::MRelease => "M_RELEASE",
            CdapOpCode::MStart => "M_START",
            CdapOpCode::MStartR => "M_START_R",
            CdapOpCode::MStop => "M_STOP",
            CdapOpCode::MStopR => "M_STOP_R",
            CdapOpCode::MCreate => "M_CREATE",
            CdapOpCode::MDelete => "M_DELETE",
            CdapOpCode::MRead => "M_READ",
            CdapOpCode::MReadR => "M_READ_R",
        };
        write!(f, "{s}")
    }
}

/// Flags carried alongside an opcode. Only `start_early` is meaningful
/// today (§4.3 transition 4); the field is a struct rather than a single
/// bool so additional negotiated flags have somewhere to land without
/// changing the wire shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdapFlags {
    pub start_early: bool,
}

/// A CDAP message: opcode, invocation id, addressed object, and a
/// result/result-reason pair used by response messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdapMessage {
    pub op_code: CdapOpCode,
    pub invoke_id: u64,
    pub obj_class: Option<String>,
    pub obj_name: String,
    pub flags: CdapFlags,
    pub result: i32,
    pub result_reason: Option<String>,
    /// Opaque serialised nested object (enrolment/DFT/LFDB/Neighbors
    /// records, or application-defined payloads). The codec does not
    /// interpret this; callers serialise/deserialise it with their own
    /// object type via [`encode_object`]/[`decode_object`].
    pub obj_value: Option<Vec<u8>>,
}

impl CdapMessage {
    pub fn request(op_code: CdapOpCode, obj_name: impl Into<String>, invoke_id: u64) -> Self {
        Self {
            op_code,
            invoke_id,
            obj_class: None,
            obj_name: obj_name.into(),
            flags: CdapFlags::default(),
            result: 0,
            result_reason: None,
            obj_value: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.obj_class = Some(class.into());
        self
    }

    pub fn with_flags(mut self, flags: CdapFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_object<T: Serialize>(mut self, obj: &T) -> Result<Self, CdapError> {
        self.obj_value = Some(encode_object(obj)?);
        Ok(self)
    }

    pub fn response(&self, op_code: CdapOpCode, result: i32, reason: Option<String>) -> Self {
        Self {
            op_code,
            invoke_id: self.invoke_id,
            obj_class: self.obj_class.clone(),
            obj_name: self.obj_name.clone(),
            flags: self.flags,
            result,
            result_reason: reason,
            obj_value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == 0
    }

    pub fn object<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CdapError> {
        let bytes = self
            .obj_value
            .as_ref()
            .ok_or_else(|| CdapError::InvalidFormat("message carries no nested object".into()))?;
        decode_object(bytes)
    }
}

/// Serialises a CDAP message to bytes for writing over a management flow.
pub fn encode_message(msg: &CdapMessage) -> Result<Vec<u8>, CdapError> {
    postcard::to_allocvec(msg).map_err(|e| CdapError::InvalidFormat(e.to_string()))
}

/// Parses a CDAP message from bytes read off a management flow.
pub fn decode_message(bytes: &[u8]) -> Result<CdapMessage, CdapError> {
    postcard::from_bytes(bytes).map_err(|e| CdapError::InvalidFormat(e.to_string()))
}

/// Serialises a nested object (enrolment/DFT/LFDB/Neighbors record) into
/// the opaque bytes carried by [`CdapMessage::obj_value`].
pub fn encode_object<T: Serialize>(obj: &T) -> Result<Vec<u8>, CdapError> {
    postcard::to_allocvec(obj).map_err(|e| CdapError::InvalidFormat(e.to_string()))
}

/// Parses a nested object out of a message's opaque bytes.
pub fn decode_object<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CdapError> {
    postcard::from_bytes(bytes).map_err(|e| CdapError::InvalidFormat(e.to_string()))
}

/// Monotonically allocates invoke-ids for one CDAP session (one per NF).
#[derive(Debug, Default)]
pub struct InvokeIdGenerator {
    next: u64,
}

impl InvokeIdGenerator {
    pub fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_message_without_object() {
        let msg = CdapMessage::request(CdapOpCode::MConnect, "", 1);
        let bytes = encode_message(&msg).unwrap();
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.op_code, CdapOpCode::MConnect);
        assert_eq!(decoded.invoke_id, 1);
    }

    #[test]
    fn round_trip_is_byte_for_byte_stable() {
        // §8 invariant 5: serialise, deserialise, serialise again ->
        // identical bytes.
        let msg = CdapMessage::request(CdapOpCode::MCreate, "/dif/mgmt/fa/dft", 7)
            .with_class("dft")
            .with_object(&vec![1u8, 2, 3])
            .unwrap();
        let once = encode_message(&msg).unwrap();
        let decoded = decode_message(&once).unwrap();
        let twice = encode_message(&decoded).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn response_preserves_invoke_id_and_addressing() {
        let req =
            CdapMessage::request(CdapOpCode::MRead, "/keepalive", 42).with_class("keepalive");
        let resp = req.response(CdapOpCode::MReadR, 0, None);
        assert_eq!(resp.invoke_id, 42);
        assert_eq!(resp.obj_name, "/keepalive");
        assert!(resp.is_success());
    }

    #[test]
    fn error_response_carries_reason() {
        let req = CdapMessage::request(CdapOpCode::MStart, "/enrollment", 1);
        let resp = req.response(CdapOpCode::MStartR, -1, Some("rejected".into()));
        assert!(!resp.is_success());
        assert_eq!(resp.result_reason.as_deref(), Some("rejected"));
    }

    #[test]
    fn invoke_id_generator_is_monotonic() {
        let mut gen = InvokeIdGenerator::default();
        assert_eq!(gen.next(), 1);
        assert_eq!(gen.next(), 2);
        assert_eq!(gen.next(), 3);
    }

    #[test]
    fn nested_object_round_trips_through_encode_decode() {
        let payload = vec!["a".to_string(), "b".to_string()];
        let msg = CdapMessage::request(CdapOpCode::MCreate, "/x", 1)
            .with_object(&payload)
            .unwrap();
        let decoded: Vec<String> = msg.object().unwrap();
        assert_eq!(decoded, payload);
    }
}
