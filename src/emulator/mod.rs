//! Synthetic llamaDAQ file generator
//!
//! Produces well-formed llamaDAQ-SIS3316 files (header, channel
//! configuration block, event packets) for tests, demos and benchmarks
//! without attached hardware. The generated wire layout is exactly what
//! [`crate::header`] and [`crate::decoder`] parse.

use std::io::Write;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::common::StreamResult;
use crate::header::{CHANNELS_PER_FADC, CHANNEL_CONFIG_SIZE, FILE_MAGIC};

/// Version triple written into generated file headers
pub const EMULATED_VERSION: (u16, u16, u16) = (2, 0, 0);

/// Geometry of one emulated channel
#[derive(Debug, Clone)]
pub struct EmulatorChannel {
    pub fadc_index: u32,
    pub channel_index: u32,
    /// Optional event blocks to emit (accumulators, MAW, energy)
    pub format_bits: u32,
    /// Raw waveform length in 16-bit samples; must be even
    pub sample_length: u32,
    /// Averaged waveform length in 16-bit samples; must be even.
    /// Zero disables the averaged-samples block entirely.
    pub avg_sample_length: u32,
}

impl EmulatorChannel {
    /// Flat routing key, matching the parser's flattening rule
    pub fn fch_id(&self) -> u32 {
        self.fadc_index * CHANNELS_PER_FADC + self.channel_index
    }

    /// Words contributed by the format-bit gated blocks
    fn block_words(&self) -> u32 {
        let mut words = 0;
        if self.format_bits & 0x1 != 0 {
            words += 7;
        }
        if self.format_bits & 0x2 != 0 {
            words += 2;
        }
        if self.format_bits & 0x4 != 0 {
            words += 3;
        }
        if self.format_bits & 0x8 != 0 {
            words += 2;
        }
        words
    }

    /// Total event length in 32-bit words, header word included
    pub fn event_length(&self) -> u32 {
        let avg_word = if self.avg_sample_length > 0 { 1 } else { 0 };
        2 + self.block_words() + 1 + avg_word + self.sample_length / 2 + self.avg_sample_length / 2
    }

    /// Serialize the 88-byte channel configuration entry
    pub fn config_entry(&self) -> Vec<u8> {
        assert!(self.sample_length % 2 == 0, "sample_length must be even");
        assert!(
            self.avg_sample_length % 2 == 0,
            "avg_sample_length must be even"
        );

        let mut entry = Vec::with_capacity(CHANNEL_CONFIG_SIZE as usize);
        entry.extend(self.fadc_index.to_le_bytes());
        entry.extend(self.channel_index.to_le_bytes());
        entry.extend(0x3u32.to_le_bytes()); // 14-bit mode, channel open
        entry.extend(0u32.to_le_bytes()); // adc_offset
        entry.extend(250.0f64.to_le_bytes()); // sample_freq in MHz
        entry.extend(1.0f64.to_le_bytes()); // gain
        entry.extend(self.format_bits.to_le_bytes());
        entry.extend(0u32.to_le_bytes()); // sample_start_index
        entry.extend(0u32.to_le_bytes()); // sample_pretrigger
        entry.extend(0u32.to_le_bytes()); // avg_sample_pretrigger
        let avg_mode: u32 = if self.avg_sample_length > 0 { 1 } else { 0 };
        entry.extend(avg_mode.to_le_bytes());
        entry.extend(self.sample_length.to_le_bytes());
        entry.extend(self.avg_sample_length.to_le_bytes());
        entry.extend(0u32.to_le_bytes()); // maw_buffer_length
        entry.extend(self.event_length().to_le_bytes());
        entry.extend((2 + self.block_words()).to_le_bytes()); // event_header_length
        entry.extend(0u32.to_le_bytes()); // accum6_offset
        entry.extend(0u32.to_le_bytes()); // accum2_offset
        entry.extend(0u32.to_le_bytes()); // maw3_offset
        entry.extend(0u32.to_le_bytes()); // energy_offset
        entry
    }

    /// Serialize one event packet for this channel
    pub fn encode_event(&self, ev: &SyntheticEvent) -> Vec<u8> {
        assert_eq!(
            ev.waveform.len(),
            self.sample_length as usize,
            "waveform length must match channel geometry"
        );
        assert_eq!(
            ev.aux_waveform.len(),
            self.avg_sample_length as usize,
            "aux waveform length must match channel geometry"
        );

        let mut words: Vec<u32> = Vec::with_capacity(self.event_length() as usize);
        let ts_high = ((ev.timestamp >> 32) & 0xffff) as u32;
        words.push((self.format_bits & 0xF) | (self.fch_id() << 4) | (ts_high << 16));
        words.push(ev.timestamp as u32);

        if self.format_bits & 0x1 != 0 {
            words.push((ev.peak_high_value as u32) | ((ev.peak_high_index as u32) << 16));
            words.push(((ev.information as u32) << 24) | (ev.acc_sum[0] & 0x00FF_FFFF));
            words.extend(&ev.acc_sum[1..6]);
        }
        if self.format_bits & 0x2 != 0 {
            words.push(ev.acc_sum[6]);
            words.push(ev.acc_sum[7]);
        }
        if self.format_bits & 0x4 != 0 {
            words.push(ev.maw_max);
            words.push(ev.maw_before);
            words.push(ev.maw_after);
        }
        if self.format_bits & 0x8 != 0 {
            words.push(ev.start_energy);
            words.push(ev.max_energy);
        }

        let kind = if self.avg_sample_length > 0 {
            0xA000_0000
        } else {
            0xE000_0000
        };
        let status = if ev.status_flag { 1u32 << 26 } else { 0 };
        words.push(kind | status | (self.sample_length / 2));
        if self.avg_sample_length > 0 {
            words.push(
                0xE000_0000 | ((ev.avg_count_status as u32) << 16) | (self.avg_sample_length / 2),
            );
        }

        for pair in ev.waveform.chunks(2).chain(ev.aux_waveform.chunks(2)) {
            words.push((pair[0] as u32) | ((pair[1] as u32) << 16));
        }

        debug_assert_eq!(words.len(), self.event_length() as usize);
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Field values for one emitted event
#[derive(Debug, Clone, Default)]
pub struct SyntheticEvent {
    /// 48-bit timestamp in clock ticks
    pub timestamp: u64,
    pub peak_high_value: u16,
    pub peak_high_index: u16,
    pub information: u8,
    /// Accumulator sums; sum 1 is truncated to 24 bits on the wire
    pub acc_sum: [u32; 8],
    pub maw_max: u32,
    pub maw_before: u32,
    pub maw_after: u32,
    pub start_energy: u32,
    pub max_energy: u32,
    pub status_flag: bool,
    pub avg_count_status: u8,
    pub waveform: Vec<u16>,
    pub aux_waveform: Vec<u16>,
}

impl SyntheticEvent {
    /// Random event matching a channel's geometry
    pub fn random(rng: &mut StdRng, channel: &EmulatorChannel, timestamp: u64) -> Self {
        Self {
            timestamp: timestamp & 0xffff_ffff_ffff,
            peak_high_value: rng.gen(),
            peak_high_index: rng.gen(),
            information: rng.gen(),
            acc_sum: {
                let mut acc = [0u32; 8];
                for a in acc.iter_mut() {
                    *a = rng.gen();
                }
                acc[0] &= 0x00FF_FFFF;
                acc
            },
            maw_max: rng.gen(),
            maw_before: rng.gen(),
            maw_after: rng.gen(),
            start_energy: rng.gen(),
            max_energy: rng.gen(),
            status_flag: rng.gen_bool(0.05),
            avg_count_status: rng.gen(),
            waveform: (0..channel.sample_length).map(|_| rng.gen()).collect(),
            aux_waveform: (0..channel.avg_sample_length).map(|_| rng.gen()).collect(),
        }
    }
}

/// Serialize the file header plus the channel configuration block
pub fn header_bytes(channels: &[EmulatorChannel]) -> Vec<u8> {
    let (major, minor, patch) = EMULATED_VERSION;
    let mut bytes = Vec::with_capacity(16 + channels.len() * CHANNEL_CONFIG_SIZE as usize);
    bytes.extend(FILE_MAGIC.to_le_bytes());
    bytes.extend(patch.to_le_bytes());
    bytes.extend(minor.to_le_bytes());
    bytes.extend(major.to_le_bytes());
    bytes.extend(CHANNEL_CONFIG_SIZE.to_le_bytes());
    bytes.extend((channels.len() as u32).to_le_bytes());
    for channel in channels {
        bytes.extend(channel.config_entry());
    }
    bytes
}

/// Emulator run parameters
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub channels: Vec<EmulatorChannel>,
    /// Total number of events across all channels (round-robin)
    pub n_events: u64,
    /// RNG seed, for reproducible files
    pub seed: u64,
}

/// Generate a complete synthetic file in memory
pub fn generate(config: &EmulatorConfig) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut bytes = header_bytes(&config.channels);

    let mut timestamp = 0u64;
    for i in 0..config.n_events {
        let channel = &config.channels[(i as usize) % config.channels.len()];
        timestamp += rng.gen_range(1..10_000);
        let ev = SyntheticEvent::random(&mut rng, channel, timestamp);
        bytes.extend(channel.encode_event(&ev));
    }
    bytes
}

/// Generate a synthetic file and write it to disk
pub fn write_file<P: AsRef<Path>>(path: P, config: &EmulatorConfig) -> StreamResult<u64> {
    let bytes = generate(config);
    let mut file = std::fs::File::create(&path)?;
    file.write_all(&bytes)?;
    info!(
        path = %path.as_ref().display(),
        n_bytes = bytes.len(),
        n_events = config.n_events,
        n_channels = config.channels.len(),
        "wrote emulated llamaDAQ file"
    );
    Ok(bytes.len() as u64)
}
