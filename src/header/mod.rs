//! Header parser for llamaDAQ SIS3316 files
//!
//! A llamaDAQ file starts with a 16-byte file header followed by one
//! 88-byte configuration entry per open channel:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  File header (16 bytes)                 │
//! │  - Magic, version, econf length,        │
//! │    number of open channels              │
//! ├─────────────────────────────────────────┤
//! │  Channel config entry 0 (88 bytes)      │
//! ├─────────────────────────────────────────┤
//! │  ...                                    │
//! ├─────────────────────────────────────────┤
//! │  Channel config entry N-1 (88 bytes)    │
//! ├─────────────────────────────────────────┤
//! │  Event packets                          │
//! └─────────────────────────────────────────┘
//! ```
//! All words are little-endian.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::{read_f64, read_u16, read_u32, StreamError, StreamResult};

/// Magic word of a llamaDAQ-SIS3316 file ("LArI")
pub const FILE_MAGIC: u32 = 0x4972_414c;

/// Fixed size of the file header in bytes
pub const FILE_HEADER_SIZE: usize = 16;

/// Size of one channel configuration entry; the only supported layout
pub const CHANNEL_CONFIG_SIZE: u16 = 88;

/// Channels per SIS3316 FADC module, used to flatten (fadc, channel)
/// into a single routing key
pub const CHANNELS_PER_FADC: u32 = 16;

/// Parsed file header metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub version_patch: u16,
    /// Declared size of one channel configuration entry in bytes
    pub length_econf: u16,
    /// Number of channel configuration entries following the file header
    pub n_channels_open: u32,
}

impl FileHeader {
    /// Format the firmware version as "major.minor.patch"
    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_patch
        )
    }
}

/// Per-channel event geometry and decode parameters
///
/// Immutable once the header is parsed. `event_length` (in 32-bit words,
/// leading event header word included) is what the demultiplexer uses to
/// frame packets; the remaining fields drive sub-field decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub fadc_index: u32,
    pub channel_index: u32,
    /// ADC runs in 14-bit mode
    pub is_14bit: bool,
    /// Channel marked open in the configuration entry
    pub is_open: bool,
    pub adc_offset: u32,
    /// Sampling frequency in MHz
    pub sample_freq: f64,
    pub gain: f64,
    /// Which optional event blocks are present (accumulators, MAW, energy)
    pub format_bits: u32,
    pub sample_start_index: u32,
    pub sample_pretrigger: u32,
    pub avg_sample_pretrigger: u32,
    pub avg_mode: u32,
    /// Raw waveform length in 16-bit samples
    pub sample_length: u32,
    /// Averaged ("aux") waveform length in 16-bit samples
    pub avg_sample_length: u32,
    pub maw_buffer_length: u32,
    /// Total event packet length in 32-bit words, header word included
    pub event_length: u32,
    pub event_header_length: u32,
    pub accum6_offset: u32,
    pub accum2_offset: u32,
    pub maw3_offset: u32,
    pub energy_offset: u32,
}

impl ChannelConfig {
    /// Flat routing key combining FADC and channel index
    pub fn fch_id(&self) -> u32 {
        self.fadc_index * CHANNELS_PER_FADC + self.channel_index
    }

    /// Total event packet length in bytes
    pub fn event_length_bytes(&self) -> usize {
        self.event_length as usize * crate::common::WORD_SIZE
    }

    fn from_entry(entry: &[u8]) -> Self {
        Self {
            fadc_index: read_u32(entry, 0),
            channel_index: read_u32(entry, 4),
            is_14bit: read_u32(entry, 8) & 0x1 != 0,
            is_open: read_u32(entry, 8) & 0x2 != 0,
            adc_offset: read_u32(entry, 12),
            sample_freq: read_f64(entry, 16),
            gain: read_f64(entry, 24),
            format_bits: read_u32(entry, 32),
            sample_start_index: read_u32(entry, 36),
            sample_pretrigger: read_u32(entry, 40),
            avg_sample_pretrigger: read_u32(entry, 44),
            avg_mode: read_u32(entry, 48),
            sample_length: read_u32(entry, 52),
            avg_sample_length: read_u32(entry, 56),
            maw_buffer_length: read_u32(entry, 60),
            event_length: read_u32(entry, 64),
            event_header_length: read_u32(entry, 68),
            accum6_offset: read_u32(entry, 72),
            accum2_offset: read_u32(entry, 76),
            maw3_offset: read_u32(entry, 80),
            energy_offset: read_u32(entry, 84),
        }
    }
}

/// Read-only map from flat channel id to channel configuration
///
/// Built once per opened stream and shared by reference with the
/// demultiplexer and the event decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfigTable {
    channels: BTreeMap<u32, ChannelConfig>,
}

impl ChannelConfigTable {
    pub fn get(&self, fch_id: u32) -> Option<&ChannelConfig> {
        self.channels.get(&fch_id)
    }

    pub fn contains(&self, fch_id: u32) -> bool {
        self.channels.contains_key(&fch_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterate entries ordered by channel id
    pub fn iter(&self) -> impl Iterator<Item = (&u32, &ChannelConfig)> {
        self.channels.iter()
    }

    fn insert(&mut self, config: ChannelConfig) -> StreamResult<()> {
        let fch_id = config.fch_id();
        if self.channels.contains_key(&fch_id) {
            return Err(StreamError::malformed_header(format!(
                "duplicate channel configuration: FADC {}, channel {}",
                config.fadc_index, config.channel_index
            )));
        }
        self.channels.insert(fch_id, config);
        Ok(())
    }
}

/// Decoder for the llamaDAQ file header and channel configuration block
#[derive(Debug, Clone, Default)]
pub struct HeaderDecoder;

impl HeaderDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode the file header and all channel configuration entries.
    ///
    /// Returns the parsed header, the channel configuration table and the
    /// exact number of bytes consumed. Leaves the reader positioned at the
    /// first byte of the first event packet.
    pub fn decode_header<R: Read + Seek>(
        &self,
        reader: &mut R,
    ) -> StreamResult<(FileHeader, ChannelConfigTable, u64)> {
        // Should be at the start anyhow, but re-set if not
        reader.seek(SeekFrom::Start(0))?;
        let mut n_bytes_read = 0u64;

        let mut buf = [0u8; FILE_HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StreamError::malformed_header("file shorter than the 16-byte file header")
            } else {
                StreamError::Io(e)
            }
        })?;
        n_bytes_read += FILE_HEADER_SIZE as u64;

        let magic = read_u32(&buf, 0);
        if magic != FILE_MAGIC {
            return Err(StreamError::malformed_header(format!(
                "magic bytes not matching: got 0x{magic:08x}, expected 0x{FILE_MAGIC:08x}"
            )));
        }

        let header = FileHeader {
            version_patch: read_u16(&buf, 4),
            version_minor: read_u16(&buf, 6),
            version_major: read_u16(&buf, 8),
            length_econf: read_u16(&buf, 10),
            n_channels_open: read_u32(&buf, 12),
        };
        info!(
            version = %header.version(),
            n_channels = header.n_channels_open,
            econf_bytes = header.length_econf,
            "read llamaDAQ-SIS3316 file header"
        );

        if header.length_econf != CHANNEL_CONFIG_SIZE {
            return Err(StreamError::malformed_header(format!(
                "invalid channel configuration entry size: {} (expected {})",
                header.length_econf, CHANNEL_CONFIG_SIZE
            )));
        }

        let mut table = ChannelConfigTable::default();
        let mut entry = [0u8; CHANNEL_CONFIG_SIZE as usize];
        for i in 0..header.n_channels_open {
            reader.read_exact(&mut entry).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    StreamError::malformed_header(format!(
                        "file ends inside channel configuration entry {i} of {}",
                        header.n_channels_open
                    ))
                } else {
                    StreamError::Io(e)
                }
            })?;
            n_bytes_read += CHANNEL_CONFIG_SIZE as u64;

            let config = ChannelConfig::from_entry(&entry);
            if !config.is_open {
                warn!(
                    fadc = config.fadc_index,
                    channel = config.channel_index,
                    "channel in configuration marked as non-open"
                );
            }
            debug!(
                fch_id = config.fch_id(),
                event_length = config.event_length,
                sample_length = config.sample_length,
                format_bits = config.format_bits,
                "read channel configuration"
            );
            table.insert(config)?;
        }

        Ok((header, table, n_bytes_read))
    }
}
