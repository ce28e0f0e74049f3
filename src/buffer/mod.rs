//! Per-channel output buffers for decoded event records
//!
//! The demultiplexer deposits each decoded [`EventRecord`] into the buffer
//! keyed by its channel id and reports when a buffer reaches its capacity
//! watermark so the host driver can flush.
//!
//! Several keys may share one buffer: a pool is a list of buffers plus a
//! key → buffer-index map. Layouts can be declared in JSON:
//! ```json
//! {
//!   "buffers": [
//!     { "name": "geds", "key_list": [0, 1, 2, 3], "capacity": 8192 },
//!     { "name": "puls", "key_list": [64], "capacity": 1024 }
//!   ]
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{StreamError, StreamResult};
use crate::decoder::EventRecord;
use crate::header::ChannelConfigTable;

/// Default buffer capacity in records
pub const DEFAULT_CAPACITY: usize = 8192;

/// Declaration of one buffer in a pool layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSpec {
    /// Buffer name, used in flush reporting
    pub name: String,
    /// Channel ids routed into this buffer
    pub key_list: Vec<u32>,
    /// Capacity watermark in records
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// JSON-declared pool layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolLayout {
    pub buffers: Vec<BufferSpec>,
}

impl PoolLayout {
    /// Parse a layout from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// One output buffer with a capacity watermark
#[derive(Debug, Clone)]
pub struct EventBuffer {
    name: String,
    key_list: Vec<u32>,
    capacity: usize,
    records: Vec<EventRecord>,
}

impl EventBuffer {
    pub fn new(name: impl Into<String>, key_list: Vec<u32>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            key_list,
            capacity,
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_list(&self) -> &[u32] {
        &self.key_list
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Filled-watermark check
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Drain all buffered records, leaving the buffer empty
    pub fn take_records(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records)
    }

    fn push(&mut self, record: EventRecord) -> bool {
        self.records.push(record);
        self.is_full()
    }
}

/// Keyed collection of per-channel event buffers
#[derive(Debug, Clone, Default)]
pub struct RawBufferPool {
    buffers: Vec<EventBuffer>,
    keyed: HashMap<u32, usize>,
}

impl RawBufferPool {
    /// Build a pool from an explicit layout
    ///
    /// Fails if a key appears in more than one buffer's key list.
    pub fn from_layout(layout: &PoolLayout) -> StreamResult<Self> {
        let mut pool = Self::default();
        for spec in &layout.buffers {
            pool.add_buffer(EventBuffer::new(
                spec.name.clone(),
                spec.key_list.clone(),
                spec.capacity,
            ))?;
        }
        Ok(pool)
    }

    /// Build the default pool: one buffer per configured channel
    ///
    /// Channels can differ in waveform geometry, so records of different
    /// channels never share a buffer by default.
    pub fn from_table(table: &ChannelConfigTable, capacity: usize) -> Self {
        let mut pool = Self::default();
        for (&fch_id, _) in table.iter() {
            let buffer = EventBuffer::new(format!("ch_{fch_id:03}"), vec![fch_id], capacity);
            // keys come from a map, so they cannot collide
            pool.add_buffer(buffer).expect("unique channel keys");
        }
        pool
    }

    fn add_buffer(&mut self, buffer: EventBuffer) -> StreamResult<()> {
        let index = self.buffers.len();
        for &key in &buffer.key_list {
            if self.keyed.insert(key, index).is_some() {
                return Err(StreamError::invalid_state(
                    format!("key {key} in a single buffer"),
                    format!("key {key} in overlapping key lists"),
                ));
            }
        }
        self.buffers.push(buffer);
        Ok(())
    }

    pub fn n_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Total records currently buffered across all buffers
    pub fn n_records(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }

    /// Look up the buffer a key routes into
    pub fn get(&self, fch_id: u32) -> Option<&EventBuffer> {
        self.keyed.get(&fch_id).map(|&i| &self.buffers[i])
    }

    /// True if the pool has a buffer for this key
    pub fn contains_key(&self, fch_id: u32) -> bool {
        self.keyed.contains_key(&fch_id)
    }

    /// Deposit a record into the buffer keyed by its channel id.
    ///
    /// Returns whether that buffer is now at or above its watermark.
    pub fn push(&mut self, record: EventRecord) -> StreamResult<bool> {
        let fch_id = record.fch_id;
        let &index = self.keyed.get(&fch_id).ok_or(StreamError::UnknownChannel {
            fch_id,
            offset: 0,
        })?;
        let full = self.buffers[index].push(record);
        if full {
            debug!(buffer = %self.buffers[index].name(), "output buffer full");
        }
        Ok(full)
    }

    /// Iterate buffers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &EventBuffer> {
        self.buffers.iter()
    }

    /// Iterate buffers mutably, for host-side flushing
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EventBuffer> {
        self.buffers.iter_mut()
    }

    /// True if any buffer is at or above its watermark
    pub fn any_full(&self) -> bool {
        self.buffers.iter().any(|b| b.is_full())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fch_id: u32, packet_id: u64) -> EventRecord {
        EventRecord {
            packet_id,
            fch_id,
            timestamp: packet_id * 10,
            format_bits: 0,
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
        }
    }

    fn pool_with(specs: &[(&str, &[u32], usize)]) -> RawBufferPool {
        let layout = PoolLayout {
            buffers: specs
                .iter()
                .map(|(name, keys, cap)| BufferSpec {
                    name: name.to_string(),
                    key_list: keys.to_vec(),
                    capacity: *cap,
                })
                .collect(),
        };
        RawBufferPool::from_layout(&layout).unwrap()
    }

    #[test]
    fn test_push_and_watermark() {
        let mut pool = pool_with(&[("ch5", &[5], 2)]);
        assert!(!pool.push(record(5, 1)).unwrap());
        assert!(!pool.any_full());
        assert!(pool.push(record(5, 2)).unwrap());
        assert!(pool.any_full());
        assert_eq!(pool.get(5).unwrap().len(), 2);
    }

    #[test]
    fn test_shared_buffer_keys() {
        let mut pool = pool_with(&[("geds", &[0, 1, 2], 10)]);
        pool.push(record(0, 1)).unwrap();
        pool.push(record(2, 2)).unwrap();
        let buffer = pool.get(1).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.name(), "geds");
    }

    #[test]
    fn test_overlapping_key_lists_rejected() {
        let layout = PoolLayout {
            buffers: vec![
                BufferSpec {
                    name: "a".into(),
                    key_list: vec![1, 2],
                    capacity: 4,
                },
                BufferSpec {
                    name: "b".into(),
                    key_list: vec![2, 3],
                    capacity: 4,
                },
            ],
        };
        assert!(RawBufferPool::from_layout(&layout).is_err());
    }

    #[test]
    fn test_unknown_key_push() {
        let mut pool = pool_with(&[("ch5", &[5], 2)]);
        let err = pool.push(record(9, 1)).unwrap_err();
        assert!(matches!(err, StreamError::UnknownChannel { fch_id: 9, .. }));
    }

    #[test]
    fn test_take_records_resets_watermark() {
        let mut pool = pool_with(&[("ch5", &[5], 1)]);
        assert!(pool.push(record(5, 1)).unwrap());
        let taken = pool.iter_mut().next().unwrap().take_records();
        assert_eq!(taken.len(), 1);
        assert!(!pool.any_full());
        assert_eq!(pool.n_records(), 0);
    }

    #[test]
    fn test_layout_from_json() {
        let layout = PoolLayout::from_json(
            r#"{ "buffers": [ { "name": "geds", "key_list": [0, 1], "capacity": 16 },
                              { "name": "puls", "key_list": [64] } ] }"#,
        )
        .unwrap();
        assert_eq!(layout.buffers.len(), 2);
        assert_eq!(layout.buffers[1].capacity, DEFAULT_CAPACITY);
        let pool = RawBufferPool::from_layout(&layout).unwrap();
        assert_eq!(pool.n_buffers(), 2);
        assert!(pool.contains_key(64));
    }
}
