//! E2E tests for the llamaDAQ stream demultiplexer (encode → stream → verify)
//!
//! Synthetic files are built with the emulator's encoders, so every byte the
//! streamer consumes was produced by the same wire layout it parses.

use std::io::Cursor;

use rand::rngs::StdRng;
use rand::SeedableRng;

use llamadaq_rs::buffer::{BufferSpec, PoolLayout, RawBufferPool};
use llamadaq_rs::common::StreamError;
use llamadaq_rs::decoder::EventRecord;
use llamadaq_rs::emulator::{header_bytes, EmulatorChannel, EmulatorConfig, SyntheticEvent};
use llamadaq_rs::streamer::{LlamaStreamer, StreamState};

fn channel(channel_index: u32, format_bits: u32, sample_length: u32) -> EmulatorChannel {
    EmulatorChannel {
        fadc_index: 0,
        channel_index,
        format_bits,
        sample_length,
        avg_sample_length: 0,
    }
}

/// Stream a whole in-memory file, flushing every record into one Vec.
/// Returns the records in deposit order plus the finished streamer.
fn drain_stream(bytes: Vec<u8>) -> (Vec<EventRecord>, LlamaStreamer<Cursor<Vec<u8>>>) {
    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).expect("open");
    let mut pool = RawBufferPool::from_table(streamer.channel_configs(), 4);

    let mut records = Vec::new();
    loop {
        let more = streamer.read_packet(&mut pool).expect("read_packet");
        if streamer.any_buffer_full() || !more {
            for buffer in pool.iter_mut() {
                records.extend(buffer.take_records());
            }
            streamer.clear_full_flag();
        }
        if !more {
            break;
        }
    }
    records.sort_by_key(|r| r.packet_id);
    (records, streamer)
}

#[test]
fn test_end_to_end_two_packets_for_channel_5() {
    // header declares channel 5 with event_length_words = 10 (40-byte packets)
    let ch5 = channel(5, 0, 14);
    assert_eq!(ch5.event_length(), 10);

    let ev1 = SyntheticEvent {
        timestamp: 100,
        waveform: (100..114).collect(),
        ..SyntheticEvent::default()
    };
    let ev2 = SyntheticEvent {
        timestamp: 200,
        waveform: (200..214).collect(),
        ..SyntheticEvent::default()
    };
    let mut bytes = header_bytes(&[ch5.clone()]);
    let packet1 = ch5.encode_event(&ev1);
    // leading word carries channel bits = 5 and nothing else
    assert_eq!(&packet1[0..4], &0x0000_0050u32.to_le_bytes());
    assert_eq!(packet1.len(), 40);
    bytes.extend(&packet1);
    bytes.extend(ch5.encode_event(&ev2));

    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).unwrap();
    let mut pool = RawBufferPool::from_table(streamer.channel_configs(), 8);

    assert!(streamer.read_packet(&mut pool).unwrap());
    assert!(streamer.read_packet(&mut pool).unwrap());
    assert!(!streamer.read_packet(&mut pool).unwrap());
    assert_eq!(streamer.state(), StreamState::Closed);

    let buffer = pool.get(5).expect("channel 5 buffer");
    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.records()[0].timestamp, 100);
    assert_eq!(buffer.records()[0].waveform.as_deref(), Some(&(100..114).collect::<Vec<u16>>()[..]));
    assert_eq!(buffer.records()[1].timestamp, 200);
    assert_eq!(buffer.records()[1].packet_id, 2);
}

#[test]
fn test_header_only_stream_terminates_cleanly() {
    let bytes = header_bytes(&[channel(0, 0, 0)]);
    let header_len = bytes.len() as u64;

    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).unwrap();
    let mut pool = RawBufferPool::from_table(streamer.channel_configs(), 8);

    assert!(!streamer.read_packet(&mut pool).unwrap());
    assert_eq!(streamer.n_bytes_read(), header_len);
    assert_eq!(streamer.packet_id(), 0);
    assert_eq!(pool.n_records(), 0);
}

#[test]
fn test_bytes_consumed_equals_stream_length() {
    let config = EmulatorConfig {
        channels: vec![
            channel(0, 0x1, 8),
            channel(1, 0xF, 32),
            channel(2, 0x0, 0),
        ],
        n_events: 97,
        seed: 2024,
    };
    let bytes = llamadaq_rs::emulator::generate(&config);
    let total_len = bytes.len() as u64;

    let (records, streamer) = drain_stream(bytes);
    assert_eq!(records.len(), 97);
    assert_eq!(streamer.packet_id(), 97);
    assert_eq!(streamer.n_bytes_read(), total_len);
}

#[test]
fn test_round_trip_preserves_fields_and_order() {
    let ch = channel(3, 0xF, 16);
    let mut rng = StdRng::seed_from_u64(99);

    let events: Vec<SyntheticEvent> = (1..=20)
        .map(|i| {
            let mut ev = SyntheticEvent::random(&mut rng, &ch, i * 1_000_003);
            ev.status_flag = i % 2 == 0;
            ev
        })
        .collect();

    let mut bytes = header_bytes(&[ch.clone()]);
    for ev in &events {
        bytes.extend(ch.encode_event(ev));
    }

    let (records, _) = drain_stream(bytes);
    assert_eq!(records.len(), events.len());
    for (i, (rec, ev)) in records.iter().zip(&events).enumerate() {
        assert_eq!(rec.packet_id, i as u64 + 1, "order must match the wire");
        assert_eq!(rec.fch_id, 3);
        assert_eq!(rec.timestamp, ev.timestamp);
        assert_eq!(rec.peak_high_value, ev.peak_high_value);
        assert_eq!(rec.peak_high_index, ev.peak_high_index);
        assert_eq!(rec.information, ev.information);
        assert_eq!(rec.acc_sum, ev.acc_sum);
        assert_eq!(rec.maw_max, ev.maw_max);
        assert_eq!(rec.maw_before, ev.maw_before);
        assert_eq!(rec.maw_after, ev.maw_after);
        assert_eq!(rec.start_energy, ev.start_energy);
        assert_eq!(rec.max_energy, ev.max_energy);
        assert_eq!(rec.status_flag, ev.status_flag);
        assert_eq!(rec.waveform.as_ref(), Some(&ev.waveform));
        assert_eq!(rec.aux_waveform, None);
    }
}

#[test]
fn test_aux_waveform_round_trip() {
    let ch = EmulatorChannel {
        fadc_index: 1,
        channel_index: 2,
        format_bits: 0,
        sample_length: 8,
        avg_sample_length: 4,
    };
    let ev = SyntheticEvent {
        timestamp: 0x1234_5678_9abc,
        waveform: vec![1, 2, 3, 4, 5, 6, 7, 8],
        aux_waveform: vec![9, 10, 11, 12],
        avg_count_status: 3,
        ..SyntheticEvent::default()
    };
    let mut bytes = header_bytes(&[ch.clone()]);
    bytes.extend(ch.encode_event(&ev));

    let (records, _) = drain_stream(bytes);
    assert_eq!(records.len(), 1);
    // fadc 1, channel 2 -> fch 18
    assert_eq!(records[0].fch_id, 18);
    assert_eq!(records[0].timestamp, 0x1234_5678_9abc);
    assert_eq!(records[0].waveform.as_ref(), Some(&ev.waveform));
    assert_eq!(records[0].aux_waveform.as_ref(), Some(&ev.aux_waveform));
}

#[test]
fn test_mixed_event_lengths_demultiplex() {
    // channels with different geometries interleaved on the wire
    let short = channel(0, 0, 0); // 3 words
    let long = channel(1, 0x3, 40); // 2 + 9 + 1 + 20 words
    let mut rng = StdRng::seed_from_u64(5);

    let mut bytes = header_bytes(&[short.clone(), long.clone()]);
    for i in 0..10u64 {
        let ch = if i % 2 == 0 { &short } else { &long };
        bytes.extend(ch.encode_event(&SyntheticEvent::random(&mut rng, ch, (i + 1) * 7)));
    }

    let (records, streamer) = drain_stream(bytes);
    assert_eq!(records.len(), 10);
    assert_eq!(records.iter().filter(|r| r.fch_id == 0).count(), 5);
    assert_eq!(records.iter().filter(|r| r.fch_id == 1).count(), 5);
    assert_eq!(streamer.state(), StreamState::Closed);
}

#[test]
fn test_streaming_is_deterministic_across_reads() {
    // peek/rewind must not change what a second pass over the file sees
    let config = EmulatorConfig {
        channels: vec![channel(0, 0x5, 12), channel(7, 0, 0)],
        n_events: 31,
        seed: 7,
    };
    let bytes = llamadaq_rs::emulator::generate(&config);

    let (first, _) = drain_stream(bytes.clone());
    let (second, _) = drain_stream(bytes);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.packet_id, b.packet_id);
        assert_eq!(a.fch_id, b.fch_id);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.waveform, b.waveform);
    }
}

#[test]
fn test_unknown_channel_deposits_nothing() {
    let ch = channel(0, 0, 0);
    let mut bytes = header_bytes(&[ch.clone()]);
    bytes.extend(ch.encode_event(&SyntheticEvent::default()));
    // second packet claims channel 2, which the header never declared
    bytes.extend((2u32 << 4).to_le_bytes());
    bytes.extend([0u8; 8]);

    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).unwrap();
    let mut pool = RawBufferPool::from_table(streamer.channel_configs(), 8);

    assert!(streamer.read_packet(&mut pool).unwrap());
    let err = streamer.read_packet(&mut pool).unwrap_err();
    assert!(matches!(err, StreamError::UnknownChannel { fch_id: 2, .. }));
    assert_eq!(streamer.state(), StreamState::Error);
    // only the first packet's record made it into the pool
    assert_eq!(pool.n_records(), 1);

    // fatal errors latch until the stream is reopened
    let err = streamer.read_packet(&mut pool).unwrap_err();
    assert!(matches!(err, StreamError::InvalidState { .. }));
}

#[test]
fn test_declared_length_beyond_eof_is_truncation() {
    let ch = channel(4, 0, 100); // 53-word events
    let mut bytes = header_bytes(&[ch.clone()]);
    let packet = ch.encode_event(&SyntheticEvent {
        waveform: vec![0; 100],
        ..SyntheticEvent::default()
    });
    bytes.extend(&packet[..60]); // well short of the declared 212 bytes

    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).unwrap();
    let mut pool = RawBufferPool::from_table(streamer.channel_configs(), 8);

    let err = streamer.read_packet(&mut pool).unwrap_err();
    assert!(matches!(
        err,
        StreamError::TruncatedPacket {
            wanted: 212,
            got: 60,
            ..
        }
    ));
    assert_eq!(pool.n_records(), 0);
}

#[test]
fn test_shared_buffer_layout_routes_multiple_channels() {
    let channels = vec![channel(0, 0, 4), channel(1, 0, 4), channel(2, 0, 4)];
    let mut rng = StdRng::seed_from_u64(11);
    let mut bytes = header_bytes(&channels);
    for i in 0..9u64 {
        let ch = &channels[(i % 3) as usize];
        bytes.extend(ch.encode_event(&SyntheticEvent::random(&mut rng, ch, i + 1)));
    }

    let layout = PoolLayout {
        buffers: vec![
            BufferSpec {
                name: "geds".into(),
                key_list: vec![0, 1],
                capacity: 100,
            },
            BufferSpec {
                name: "spms".into(),
                key_list: vec![2],
                capacity: 100,
            },
        ],
    };
    let mut pool = RawBufferPool::from_layout(&layout).unwrap();

    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).unwrap();
    while streamer.read_packet(&mut pool).unwrap() {}

    assert_eq!(pool.get(0).unwrap().name(), "geds");
    assert_eq!(pool.get(0).unwrap().len(), 6); // channels 0 and 1 share
    assert_eq!(pool.get(2).unwrap().len(), 3);
}

#[test]
fn test_full_watermark_reported_to_driver() {
    let ch = channel(0, 0, 0);
    let mut bytes = header_bytes(&[ch.clone()]);
    for i in 0..5u64 {
        bytes.extend(ch.encode_event(&SyntheticEvent {
            timestamp: i,
            ..SyntheticEvent::default()
        }));
    }

    let mut streamer = LlamaStreamer::new();
    streamer.open_stream(Cursor::new(bytes)).unwrap();
    let mut pool = RawBufferPool::from_table(streamer.channel_configs(), 2);

    assert!(streamer.read_packet(&mut pool).unwrap());
    assert!(!streamer.any_buffer_full());
    assert!(streamer.read_packet(&mut pool).unwrap());
    assert!(streamer.any_buffer_full());

    // host flushes and clears, streaming continues
    for buffer in pool.iter_mut() {
        buffer.take_records();
    }
    streamer.clear_full_flag();
    assert!(!streamer.any_buffer_full());

    while streamer.read_packet(&mut pool).unwrap() {}
    assert_eq!(streamer.packet_id(), 5);
}
