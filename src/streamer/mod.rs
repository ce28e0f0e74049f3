//! Stream demultiplexer for llamaDAQ SIS3316 data
//!
//! Drives the header parser once per opened stream, then frames one event
//! packet per [`LlamaStreamer::read_packet`] call and routes the decoded
//! record into the per-channel output buffer pool.
//!
//! Packets are framed with a peek/rewind protocol: channels can have
//! different event lengths, so the packet length is only known after
//! inspecting the leading word. The streamer reads 4 bytes, extracts the
//! channel id, seeks back and then reads the full declared packet so that
//! net bytes consumed always equal the declared packet length.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace, warn};

use crate::buffer::RawBufferPool;
use crate::common::{StreamError, StreamResult, WORD_SIZE};
use crate::decoder::{fch_id_from_word, EventDecoder};
use crate::header::{ChannelConfigTable, FileHeader, HeaderDecoder};

/// Demultiplexer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No stream attached
    Idle,
    /// Header parsed, event packets being read
    Streaming,
    /// Clean end-of-stream observed
    Closed,
    /// A fatal framing/decoding error occurred; reopen required
    Error,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamState::Idle => "Idle",
            StreamState::Streaming => "Streaming",
            StreamState::Closed => "Closed",
            StreamState::Error => "Error",
        };
        write!(f, "{name}")
    }
}

/// Streaming demultiplexer for llamaDAQ SIS3316 files
///
/// Single-threaded and pull-based: the host calls [`read_packet`] until it
/// returns `Ok(false)` (clean end-of-stream). All decode errors are fatal
/// for the stream; the wire format has no resynchronization primitive.
///
/// [`read_packet`]: LlamaStreamer::read_packet
#[derive(Debug)]
pub struct LlamaStreamer<R: Read + Seek> {
    in_stream: Option<R>,
    state: StreamState,
    header_decoder: HeaderDecoder,
    event_decoder: EventDecoder,
    file_header: Option<FileHeader>,
    channel_configs: ChannelConfigTable,
    n_bytes_read: u64,
    packet_id: u64,
    any_full: bool,
    n_skipped: u64,
}

impl<R: Read + Seek> Default for LlamaStreamer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read + Seek> LlamaStreamer<R> {
    pub fn new() -> Self {
        Self {
            in_stream: None,
            state: StreamState::Idle,
            header_decoder: HeaderDecoder::new(),
            event_decoder: EventDecoder::new(),
            file_header: None,
            channel_configs: ChannelConfigTable::default(),
            n_bytes_read: 0,
            packet_id: 0,
            any_full: false,
            n_skipped: 0,
        }
    }

    /// Open a stream: parse the header and arm the packet loop.
    ///
    /// Resets the byte/packet counters, consumes the header and leaves the
    /// stream positioned at the first event packet. Returns the parsed file
    /// header metadata.
    pub fn open_stream(&mut self, mut reader: R) -> StreamResult<&FileHeader> {
        if self.in_stream.is_some() {
            return Err(StreamError::invalid_state(
                "Idle",
                format!("{} (previous stream still open)", self.state),
            ));
        }
        self.n_bytes_read = 0;
        self.packet_id = 0;
        self.any_full = false;
        self.n_skipped = 0;

        match self.header_decoder.decode_header(&mut reader) {
            Ok((header, table, n_bytes_hdr)) => {
                self.n_bytes_read = n_bytes_hdr;
                self.file_header = Some(header);
                self.channel_configs = table;
                self.in_stream = Some(reader);
                self.state = StreamState::Streaming;
                Ok(self.file_header.as_ref().expect("just set"))
            }
            Err(e) => {
                self.in_stream = Some(reader);
                self.state = StreamState::Error;
                Err(e)
            }
        }
    }

    /// Close the stream and return the reader.
    ///
    /// Valid from any state except `Idle`; resets the streamer so it can be
    /// reopened on another stream.
    pub fn close_stream(&mut self) -> StreamResult<R> {
        let reader = self.in_stream.take().ok_or_else(|| {
            StreamError::invalid_state("an open stream", self.state.to_string())
        })?;
        self.state = StreamState::Idle;
        self.file_header = None;
        self.channel_configs = ChannelConfigTable::default();
        Ok(reader)
    }

    /// Read a single packet's worth of data into the buffer pool.
    ///
    /// Returns `Ok(true)` while there is still data to read and `Ok(false)`
    /// on clean end-of-stream (zero bytes available at a packet boundary).
    /// Any error is fatal: the state becomes `Error` and further calls are
    /// rejected until the stream is closed and reopened.
    pub fn read_packet(&mut self, pool: &mut RawBufferPool) -> StreamResult<bool> {
        if self.state != StreamState::Streaming {
            return Err(StreamError::invalid_state(
                "Streaming",
                self.state.to_string(),
            ));
        }

        let framed = match self.read_packet_bytes() {
            Ok(framed) => framed,
            Err(e) => {
                self.state = StreamState::Error;
                return Err(e);
            }
        };
        let (packet, fch_id) = match framed {
            Some(framed) => framed,
            None => {
                self.state = StreamState::Closed;
                debug!(
                    n_bytes = self.n_bytes_read,
                    n_packets = self.packet_id,
                    "end of stream"
                );
                return Ok(false);
            }
        };

        self.packet_id += 1;
        self.n_bytes_read += packet.len() as u64;
        trace!(
            packet_id = self.packet_id,
            fch_id,
            n_bytes = packet.len(),
            total_bytes = self.n_bytes_read,
            "read packet"
        );

        let config = self
            .channel_configs
            .get(fch_id)
            .expect("validated during framing");
        let record = match self
            .event_decoder
            .decode_packet(&packet, fch_id, self.packet_id, config)
        {
            Ok(record) => record,
            Err(e) => {
                self.state = StreamState::Error;
                return Err(e);
            }
        };

        if pool.contains_key(fch_id) {
            self.any_full |= pool.push(record)?;
        } else {
            // a pool layout may deliberately leave channels unrouted
            if self.n_skipped == 0 {
                warn!(fch_id, "no output buffer for channel, skipping records");
            }
            self.n_skipped += 1;
        }

        Ok(true)
    }

    /// Frame one packet: peek the channel id, rewind, read the full packet.
    ///
    /// Returns `None` on clean end-of-stream. A partial leading word or a
    /// short packet read is a `TruncatedPacket`; a channel id without a
    /// configuration entry is an `UnknownChannel`. Both are fatal.
    fn read_packet_bytes(&mut self) -> StreamResult<Option<(Vec<u8>, u32)>> {
        let Self {
            in_stream,
            channel_configs,
            ..
        } = self;
        let stream = in_stream.as_mut().ok_or_else(|| {
            StreamError::invalid_state("an open stream", StreamState::Idle.to_string())
        })?;

        // save the position of the event header's first byte
        let position = stream.stream_position()?;
        let mut word = [0u8; WORD_SIZE];
        let got = read_up_to(stream, &mut word)?;
        if got == 0 {
            return Ok(None); // EOF
        }
        if got < WORD_SIZE {
            // a partially available header word cannot be clean termination
            return Err(StreamError::TruncatedPacket {
                offset: position,
                wanted: WORD_SIZE,
                got,
            });
        }
        // the header word is re-read as part of the full packet
        stream.seek(SeekFrom::Start(position))?;

        let fch_id = fch_id_from_word(u32::from_le_bytes(word));
        let config = channel_configs
            .get(fch_id)
            .ok_or(StreamError::UnknownChannel {
                fch_id,
                offset: position,
            })?;

        let event_length_bytes = config.event_length_bytes();
        let mut packet = vec![0u8; event_length_bytes];
        let got = read_up_to(stream, &mut packet)?;
        if got < event_length_bytes {
            return Err(StreamError::TruncatedPacket {
                offset: position,
                wanted: event_length_bytes,
                got,
            });
        }

        Ok(Some((packet, fch_id)))
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Parsed file header, available after a successful open
    pub fn file_header(&self) -> Option<&FileHeader> {
        self.file_header.as_ref()
    }

    /// Channel configuration table built from the header
    pub fn channel_configs(&self) -> &ChannelConfigTable {
        &self.channel_configs
    }

    /// Total bytes consumed from the stream, header included
    pub fn n_bytes_read(&self) -> u64 {
        self.n_bytes_read
    }

    /// Number of packets read so far
    pub fn packet_id(&self) -> u64 {
        self.packet_id
    }

    /// Records dropped because the pool had no buffer for their channel
    pub fn n_skipped(&self) -> u64 {
        self.n_skipped
    }

    /// True once any output buffer reached its watermark
    ///
    /// Sticky until [`clear_full_flag`](Self::clear_full_flag) is called;
    /// the host clears it after flushing the pool.
    pub fn any_buffer_full(&self) -> bool {
        self.any_full
    }

    pub fn clear_full_flag(&mut self) {
        self.any_full = false;
    }
}

/// Read into `buf` until it is full or EOF; returns the bytes read.
///
/// Unlike `read_exact`, a short read reports how many bytes arrived, which
/// the truncation errors need for diagnostics.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
