//! Event decoder for llamaDAQ SIS3316 event packets
//!
//! Decodes a single event packet, as specified in the Struck SIS3316 manual,
//! into a structured [`EventRecord`]. A packet corresponds to one event on
//! one channel and carries a unique timestamp; packets of different channels
//! can vary in size.
//!
//! # Packet layout (32-bit LE words)
//!
//! ```text
//! word 0      format bits (0-3), fch id (4-15), timestamp bits 32-47 (16-31)
//! word 1      timestamp bits 0-31
//! [7 words]   peak high pair, information + accumulator sums 1-6 (format bit 0)
//! [2 words]   accumulator sums 7-8                               (format bit 1)
//! [3 words]   MAW maximum / before / after                       (format bit 2)
//! [2 words]   start energy / max energy                          (format bit 3)
//! 1 word      raw waveform length, status flag, MAW-test flag
//! [1 word]    averaged waveform length (only if announced above)
//! ...         16-bit waveform samples: raw samples, then averaged
//! ```

use serde::{Deserialize, Serialize};

use crate::common::{read_u16, read_u32, StreamError, StreamResult};
use crate::header::ChannelConfig;

/// SIS3316 event packet constants (32-bit words, Little Endian)
mod constants {
    // Event header word 0
    pub const FCH_ID_SHIFT: u32 = 4;
    pub const FCH_ID_MASK: u32 = 0xFFF;
    pub const FORMAT_BITS_MASK: u32 = 0xF;
    pub const TIMESTAMP_HIGH_MASK: u32 = 0xFFFF_0000;
    pub const TIMESTAMP_HIGH_SHIFT: u32 = 16;

    // Format bits
    pub const FORMAT_ACCUM_1_6: u32 = 0x1;
    pub const FORMAT_ACCUM_7_8: u32 = 0x2;
    pub const FORMAT_MAW: u32 = 0x4;
    pub const FORMAT_ENERGY: u32 = 0x8;

    // Word after the peak-high pair: information byte + accumulator sum 1
    pub const INFORMATION_SHIFT: u32 = 24;
    pub const INFORMATION_MASK: u32 = 0xFF;
    pub const ACCUM1_MASK: u32 = 0x00FF_FFFF;

    // Raw waveform length word
    pub const RAW_LENGTH_MASK: u32 = 0x03FF_FFFF;
    pub const STATUS_FLAG_BIT: u32 = 1 << 26;
    pub const MAW_TEST_FLAG_BIT: u32 = 1 << 27;
    pub const LENGTH_KIND_MASK: u32 = 0xF000_0000;
    pub const LENGTH_KIND_FINAL: u32 = 0xE000_0000;
    pub const LENGTH_KIND_AVG_FOLLOWS: u32 = 0xA000_0000;

    // Averaged waveform length word
    pub const AVG_LENGTH_MASK: u32 = 0xFFFF;
    pub const AVG_COUNT_STATUS_SHIFT: u32 = 16;
    pub const AVG_COUNT_STATUS_MASK: u32 = 0xFF;
}

/// Extract the flat channel id from an event's leading word
#[inline]
pub fn fch_id_from_word(word: u32) -> u32 {
    (word >> constants::FCH_ID_SHIFT) & constants::FCH_ID_MASK
}

/// One decoded SIS3316 event
///
/// Fields gated by format bits are zero when the corresponding block is
/// absent from the packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Packet index in the stream (1-based, assigned by the demultiplexer)
    pub packet_id: u64,
    /// Flat FADC/channel id
    pub fch_id: u32,
    /// 48-bit timestamp in clock ticks
    pub timestamp: u64,
    /// Format bits from the event header word
    pub format_bits: u32,
    /// Status flag from the raw-length word (bit 26)
    pub status_flag: bool,

    // Format bit 0: peak high + accumulator sums 1-6
    pub peak_high_value: u16,
    pub peak_high_index: u16,
    pub information: u8,
    pub acc_sum: [u32; 8],

    // Format bit 2: moving average window
    pub maw_max: u32,
    pub maw_before: u32,
    pub maw_after: u32,

    // Format bit 3: energy
    pub start_energy: u32,
    pub max_energy: u32,

    /// Raw waveform samples
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<u16>>,
    /// Averaged waveform samples ("aux waveform" for historic GERDA reasons)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_waveform: Option<Vec<u16>>,
}

impl std::fmt::Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ch:{:3} T:{:15} E:{:6} Acc1:{:8}{}",
            self.fch_id,
            self.timestamp,
            self.max_energy,
            self.acc_sum[0],
            if self.waveform.is_some() { " [WF]" } else { "" }
        )
    }
}

/// Decoder for llamaDAQ SIS3316 digitizer event packets
///
/// Pure per-packet decoding; the only shared input is the read-only
/// [`ChannelConfig`] resolved by the demultiplexer.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a single event packet of already-validated total length.
    ///
    /// The demultiplexer guarantees `packet.len()` equals the channel's
    /// declared event length; internal sub-field invariants are validated
    /// here and violations fail with `MalformedEvent`.
    pub fn decode_packet(
        &self,
        packet: &[u8],
        fch_id: u32,
        packet_id: u64,
        config: &ChannelConfig,
    ) -> StreamResult<EventRecord> {
        use constants::*;

        let n_words = packet.len() / crate::common::WORD_SIZE;
        let word = |i: usize| -> StreamResult<u32> {
            if i >= n_words {
                Err(StreamError::malformed_event(
                    packet_id,
                    fch_id,
                    format!("packet of {n_words} words too short for declared format blocks"),
                ))
            } else {
                Ok(read_u32(packet, i * crate::common::WORD_SIZE))
            }
        };

        let w0 = word(0)?;
        let w1 = word(1)?;
        let format_bits = w0 & FORMAT_BITS_MASK;
        let timestamp =
            (((w0 & TIMESTAMP_HIGH_MASK) as u64) << TIMESTAMP_HIGH_SHIFT) | w1 as u64;

        let mut record = EventRecord {
            packet_id,
            fch_id,
            timestamp,
            format_bits,
            status_flag: false,
            peak_high_value: 0,
            peak_high_index: 0,
            information: 0,
            acc_sum: [0; 8],
            maw_max: 0,
            maw_before: 0,
            maw_after: 0,
            start_energy: 0,
            max_energy: 0,
            waveform: None,
            aux_waveform: None,
        };

        let mut offset = 2usize;
        if format_bits & FORMAT_ACCUM_1_6 != 0 {
            let peak_word = word(2)?;
            record.peak_high_value = peak_word as u16;
            record.peak_high_index = (peak_word >> 16) as u16;
            let info_word = word(3)?;
            record.information = ((info_word >> INFORMATION_SHIFT) & INFORMATION_MASK) as u8;
            record.acc_sum[0] = info_word & ACCUM1_MASK;
            for i in 1..6 {
                record.acc_sum[i] = word(3 + i)?;
            }
            offset += 7;
        }
        if format_bits & FORMAT_ACCUM_7_8 != 0 {
            record.acc_sum[6] = word(offset)?;
            record.acc_sum[7] = word(offset + 1)?;
            offset += 2;
        }
        if format_bits & FORMAT_MAW != 0 {
            record.maw_max = word(offset)?;
            record.maw_before = word(offset + 1)?;
            record.maw_after = word(offset + 2)?;
            offset += 3;
        }
        if format_bits & FORMAT_ENERGY != 0 {
            record.start_energy = word(offset)?;
            record.max_energy = word(offset + 1)?;
            offset += 2;
        }

        let raw_word = word(offset)?;
        let raw_length_32 = (raw_word & RAW_LENGTH_MASK) as usize;
        record.status_flag = raw_word & STATUS_FLAG_BIT != 0;
        if raw_word & MAW_TEST_FLAG_BIT != 0 {
            return Err(StreamError::malformed_event(
                packet_id,
                fch_id,
                "cannot handle data with MAW test data",
            ));
        }
        let avg_data_coming = match raw_word & LENGTH_KIND_MASK {
            LENGTH_KIND_FINAL => false,
            LENGTH_KIND_AVG_FOLLOWS => true,
            kind => {
                return Err(StreamError::malformed_event(
                    packet_id,
                    fch_id,
                    format!("invalid raw-length word kind nibble 0x{:x}", kind >> 28),
                ))
            }
        };
        offset += 1;

        let mut avg_length_32 = 0usize;
        if avg_data_coming {
            let avg_word = word(offset)?;
            avg_length_32 = (avg_word & AVG_LENGTH_MASK) as usize;
            let _avg_count_status = (avg_word >> AVG_COUNT_STATUS_SHIFT) & AVG_COUNT_STATUS_MASK;
            if avg_word & LENGTH_KIND_MASK != LENGTH_KIND_FINAL {
                return Err(StreamError::malformed_event(
                    packet_id,
                    fch_id,
                    format!(
                        "invalid averaged-length word kind nibble 0x{:x}",
                        (avg_word & LENGTH_KIND_MASK) >> 28
                    ),
                ));
            }
            offset += 1;
        }

        // offset now points at the waveform samples
        let raw_length_16 = 2 * raw_length_32;
        let avg_length_16 = 2 * avg_length_32;
        let total_16 = packet.len() / 2;
        let header_length_16 = offset * 2;
        let expected_wf_length = total_16 - header_length_16;
        if raw_length_16 + avg_length_16 != expected_wf_length {
            return Err(StreamError::malformed_event(
                packet_id,
                fch_id,
                format!(
                    "waveform sizes {raw_length_16} (raw) and {avg_length_16} (avg) \
                     don't match expected size {expected_wf_length}"
                ),
            ));
        }

        if raw_length_16 > 0 {
            let start = header_length_16 * 2;
            record.waveform = Some(read_samples(packet, start, raw_length_16));
        }
        if avg_length_16 > 0 {
            let start = (header_length_16 + raw_length_16) * 2;
            record.aux_waveform = Some(read_samples(packet, start, avg_length_16));
        }

        // sanity vs the configured channel geometry
        debug_assert_eq!(packet.len(), config.event_length_bytes());

        Ok(record)
    }
}

/// Read `count` consecutive 16-bit LE samples starting at a byte offset
fn read_samples(packet: &[u8], start: usize, count: usize) -> Vec<u16> {
    (0..count)
        .map(|i| read_u16(packet, start + 2 * i))
        .collect()
}
