//! Single-bit operations on fixed-size byte buffers
//!
//! Both the vehicle's diagnostic payloads and the dashboard's settings frames
//! are bit-packed; every component decodes and encodes through these four
//! helpers. Offsets are caller-guaranteed in range.

/// Read one bit.
pub fn get_bit(buf: &[u8], byte_offset: usize, bit_offset: u8) -> bool {
    buf[byte_offset] & (1 << bit_offset) != 0
}

/// Write one bit. Returns whether the stored value changed.
pub fn set_bit(buf: &mut [u8], byte_offset: usize, bit_offset: u8, value: bool) -> bool {
    let before = buf[byte_offset];
    if value {
        buf[byte_offset] |= 1 << bit_offset;
    } else {
        buf[byte_offset] &= !(1 << bit_offset);
    }
    buf[byte_offset] != before
}

/// True if the same bit position differs between two buffers.
pub fn bits_differ(a: &[u8], b: &[u8], byte_offset: usize, bit_offset: u8) -> bool {
    (a[byte_offset] ^ b[byte_offset]) & (1 << bit_offset) != 0
}

/// Flip one bit and return its new value.
pub fn toggle_bit(buf: &mut [u8], byte_offset: usize, bit_offset: u8) -> bool {
    buf[byte_offset] ^= 1 << bit_offset;
    get_bit(buf, byte_offset, bit_offset)
}
