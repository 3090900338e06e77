//! MBAP header and the Modbus TCP frame.
//!
//! A frame is the 7-byte MBAP header followed by a PDU of 1..=253 bytes
//! (function code plus body). `MBAP.length` counts the unit id and the
//! PDU, so a well-formed frame satisfies `length + 6 == total bytes` and
//! never exceeds 260 bytes on the wire.

use mb_common::{ExceptionCode, MbError, MbResult};

use crate::codec;

/// Largest legal frame on the wire (MBAP + 253-byte PDU).
pub const MAX_FRAME_LEN: usize = 260;

/// Largest legal PDU (function code + body).
pub const MAX_PDU_LEN: usize = 253;

/// Modbus TCP Application Protocol (MBAP) header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier (echoed by the slave).
    pub transaction_id: u16,
    /// Protocol identifier (always 0 on the wire).
    pub protocol_id: u16,
    /// Byte count of unit id + PDU.
    pub length: u16,
    /// Unit identifier (slave address behind a gateway).
    pub unit_id: u8,
}

impl MbapHeader {
    /// MBAP header size in bytes.
    pub const SIZE: usize = 7;

    /// Create a header for a PDU of `pdu_length` bytes.
    #[must_use]
    pub fn new(transaction_id: u16, pdu_length: u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_length + 1, // +1 for unit_id
            unit_id,
        }
    }

    /// Serialize the header to bytes (big-endian).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6] = self.unit_id;
        bytes
    }

    /// Parse a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> MbResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(MbError::Frame(format!(
                "MBAP header too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        })
    }
}

/// One Modbus TCP frame: MBAP header, function code, and PDU body.
///
/// The body excludes the function code; an empty body is legal while a
/// frame is under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// MBAP envelope.
    pub mbap: MbapHeader,
    /// Function code (high bit set on exception responses).
    pub function: u8,
    /// PDU body after the function code.
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a request frame with an empty body.
    #[must_use]
    pub fn request(transaction_id: u16, unit_id: u8, function: u8) -> Self {
        Self {
            mbap: MbapHeader::new(transaction_id, 1, unit_id),
            function,
            body: Vec::new(),
        }
    }

    /// Parse a complete frame image.
    ///
    /// Fails with [`MbError::Frame`] when fewer than 8 bytes are supplied
    /// (MBAP plus function code).
    pub fn parse(bytes: &[u8]) -> MbResult<Self> {
        if bytes.len() < MbapHeader::SIZE + 1 {
            return Err(MbError::Frame(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            mbap: MbapHeader::from_bytes(bytes)?,
            function: bytes[7],
            body: bytes[8..].to_vec(),
        })
    }

    /// Produce the byte image, recomputing `MBAP.length` from the body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut mbap = self.mbap;
        mbap.length = self.body.len() as u16 + 2; // unit_id + function code
        let mut bytes = Vec::with_capacity(MbapHeader::SIZE + 1 + self.body.len());
        bytes.extend_from_slice(&mbap.to_bytes());
        bytes.push(self.function);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Actual size of this frame on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        MbapHeader::SIZE + 1 + self.body.len()
    }

    /// Total size claimed by the parsed `MBAP.length` field.
    #[must_use]
    pub fn claimed_len(&self) -> usize {
        self.mbap.length as usize + 6
    }

    /// Append a `u16` big-endian to the body.
    pub fn push_u16(&mut self, value: u16) {
        codec::put_u16(&mut self.body, value);
    }

    /// Append a `u8` to the body.
    pub fn push_u8(&mut self, value: u8) {
        codec::put_u8(&mut self.body, value);
    }

    /// Turn this frame into an exception response: the function code gets
    /// its high bit set and the body becomes the single exception byte.
    pub fn set_exception(&mut self, code: ExceptionCode) {
        self.function |= 0x80;
        self.body = vec![code.as_byte()];
        self.mbap.length = 3;
    }

    /// Whether the function code marks an exception response.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.function & 0x80 != 0
    }
}
