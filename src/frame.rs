//! CAN frame type and serial-cable wire codec
//!
//! The bridge cable presents the CAN bus as a byte stream. Each frame is
//! carried as `[LEN] [ID_HI] [ID_LO] [DATA x 8]` with LEN always 12 (the
//! total encoded length), the format the K+DCAN style cables use in CAN
//! mode.

use crate::error::{BridgeError, Result};

/// Encoded length of one cable frame
pub const WIRE_LEN: usize = 12;

/// An 11-bit identifier plus 8 data bytes, always passed by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    pub data: [u8; 8],
}

impl CanFrame {
    pub fn new(id: u16, data: [u8; 8]) -> Self {
        Self { id, data }
    }

    /// Serialize for the cable.
    pub fn to_wire(&self) -> [u8; WIRE_LEN] {
        let mut out = [0u8; WIRE_LEN];
        out[0] = WIRE_LEN as u8;
        out[1] = (self.id >> 8) as u8;
        out[2] = (self.id & 0xFF) as u8;
        out[3..].copy_from_slice(&self.data);
        out
    }

    /// Parse one cable frame from exactly `WIRE_LEN` bytes.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != WIRE_LEN {
            return Err(BridgeError::Framing(format!(
                "expected {} bytes, got {}",
                WIRE_LEN,
                bytes.len()
            )));
        }
        if bytes[0] as usize != WIRE_LEN {
            return Err(BridgeError::Framing(format!(
                "bad length byte 0x{:02X}",
                bytes[0]
            )));
        }

        let id = ((bytes[1] as u16) << 8) | bytes[2] as u16;
        let mut data = [0u8; 8];
        data.copy_from_slice(&bytes[3..]);

        Ok(Self { id, data })
    }
}
