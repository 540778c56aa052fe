//! Modbus RTU framing for function 0x01 (Read Coils).
//!
//! ```text
//! request:  [slave, 0x01, start_hi, start_lo, qty_hi, qty_lo, crc_lo, crc_hi]
//! response: [slave, 0x01, byte_count, data..., crc_lo, crc_hi]
//! ```
//!
//! Coil states are packed LSB-first, starting at the requested address.

use thiserror::Error;

/// Function code for Read Coils.
pub const READ_COILS: u8 = 0x01;

/// Largest quantity a single Read Coils request may ask for.
pub const MAX_READ_COILS: u16 = 2000;

/// Slave id + function code + byte count.
const RESPONSE_HEADER_LEN: usize = 3;

/// CRC trailer length.
const CRC_LEN: usize = 2;

/// Reasons a response frame is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Short frame: expected {expected} bytes, got {actual}")]
    Short { expected: usize, actual: usize },

    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    Checksum { computed: u16, received: u16 },

    #[error("Unexpected function code {0:#04x}")]
    FunctionCode(u8),

    #[error("Byte count {actual} does not cover {expected} data bytes")]
    ByteCount { expected: usize, actual: usize },
}

/// Modbus RTU CRC-16 (polynomial 0xA001, initial value 0xFFFF).
///
/// The result is transmitted low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC trailer (low byte, high byte) to a frame body.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// A Read Coils request for a contiguous address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCoilsRequest {
    pub slave_id: u8,
    pub start: u16,
    pub quantity: u16,
}

impl ReadCoilsRequest {
    pub fn new(slave_id: u8, start: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            start,
            quantity,
        }
    }

    /// Encode the 8-byte request frame.
    pub fn encode(&self) -> [u8; 8] {
        let [start_hi, start_lo] = self.start.to_be_bytes();
        let [qty_hi, qty_lo] = self.quantity.to_be_bytes();
        let body = [self.slave_id, READ_COILS, start_hi, start_lo, qty_hi, qty_lo];
        let [crc_lo, crc_hi] = crc16(&body).to_le_bytes();

        [
            body[0], body[1], body[2], body[3], body[4], body[5], crc_lo, crc_hi,
        ]
    }

    /// Number of packed data bytes in a well-formed response.
    pub fn data_len(&self) -> usize {
        (self.quantity as usize).div_ceil(8)
    }

    /// Total length of a well-formed response.
    pub fn response_len(&self) -> usize {
        RESPONSE_HEADER_LEN + self.data_len() + CRC_LEN
    }

    /// Validate a response and unpack one state per requested coil.
    ///
    /// Checks run in order: length, checksum, function code, byte count.
    pub fn decode_response(&self, frame: &[u8]) -> Result<Vec<bool>, FrameError> {
        let expected = self.response_len();
        if frame.len() < expected {
            return Err(FrameError::Short {
                expected,
                actual: frame.len(),
            });
        }

        let (body, trailer) = frame.split_at(frame.len() - CRC_LEN);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        let computed = crc16(body);
        if computed != received {
            return Err(FrameError::Checksum { computed, received });
        }

        if body[1] != READ_COILS {
            return Err(FrameError::FunctionCode(body[1]));
        }

        let data_len = self.data_len();
        let byte_count = body[2] as usize;
        if byte_count < data_len || RESPONSE_HEADER_LEN + byte_count > body.len() {
            return Err(FrameError::ByteCount {
                expected: data_len,
                actual: byte_count,
            });
        }

        let data = &body[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + data_len];
        let bits = (0..self.quantity as usize)
            .map(|i| (data[i / 8] >> (i % 8)) & 0x01 == 0x01)
            .collect();

        Ok(bits)
    }
}

/// Build a Read Coils response frame (used by tests and simulators).
pub fn encode_response(slave_id: u8, states: &[bool]) -> Vec<u8> {
    let mut data = vec![0u8; states.len().div_ceil(8)];
    for (i, _) in states.iter().enumerate().filter(|(_, on)| **on) {
        data[i / 8] |= 1 << (i % 8);
    }

    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + data.len() + CRC_LEN);
    frame.push(slave_id);
    frame.push(READ_COILS);
    frame.push(data.len() as u8);
    frame.extend_from_slice(&data);
    append_crc(&mut frame);
    frame
}
