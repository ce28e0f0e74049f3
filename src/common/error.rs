//! Common error types for the llamaDAQ stream decoder
//!
//! # Design Principles (KISS)
//! - One taxonomy shared by header parser, demultiplexer and event decoder
//! - All stream errors are fatal: the wire format has no resync primitive
//!   beyond declared packet lengths, so nothing is retried internally
//! - Use thiserror for ergonomic error handling

use thiserror::Error;

/// Errors raised while decoding a llamaDAQ stream
///
/// Every variant except `Io` corresponds to a framing or format violation.
/// A clean end-of-stream (zero bytes at a packet boundary) is not an error
/// and is reported through the `read_packet()` return value instead.
#[derive(Error, Debug)]
pub enum StreamError {
    /// File header bytes violate the expected marker/layout
    #[error("Malformed file header: {0}")]
    MalformedHeader(String),

    /// Packet references a channel absent from the configuration table
    #[error("Unknown channel id {fch_id} at byte offset {offset}")]
    UnknownChannel { fch_id: u32, offset: u64 },

    /// Fewer bytes available than the declared packet length
    #[error("Truncated packet at byte offset {offset}: wanted {wanted} bytes, got {got}")]
    TruncatedPacket {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    /// Internal sub-field inconsistency inside a correctly-sized packet
    #[error("Malformed event in packet {packet_id} (channel {fch_id}): {reason}")]
    MalformedEvent {
        packet_id: u64,
        fch_id: u32,
        reason: String,
    },

    /// Streamer not in expected state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Create a malformed-header error
    pub fn malformed_header(msg: impl Into<String>) -> Self {
        Self::MalformedHeader(msg.into())
    }

    /// Create a malformed-event error
    pub fn malformed_event(packet_id: u64, fch_id: u32, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            packet_id,
            fch_id,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias using StreamError
pub type StreamResult<T> = Result<T, StreamError>;
