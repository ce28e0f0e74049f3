//! Common helpers shared across the stream decoder components

pub mod error;
pub use error::{StreamError, StreamResult};

/// Size of one wire word in bytes (the SIS3316 stream is 32-bit based)
pub const WORD_SIZE: usize = 4;

/// Read a little-endian u32 at a byte offset
///
/// Callers must have bounds-checked `offset + 4 <= data.len()`.
#[inline]
pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read a little-endian u16 at a byte offset
#[inline]
pub fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a little-endian f64 at a byte offset
#[inline]
pub fn read_f64(data: &[u8], offset: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    f64::from_le_bytes(buf)
}
