//! llamaDAQ-RS: streaming decoder for llamaDAQ SIS3316 digitizer data
//!
//! Demultiplexes the binary stream written by llamaDAQ into per-channel
//! decoded event records.

pub mod buffer;
pub mod common;
pub mod config;
pub mod decoder;
pub mod emulator;
pub mod header;
pub mod streamer;
