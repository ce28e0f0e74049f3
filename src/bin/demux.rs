//! demux - stream a llamaDAQ file into per-channel record buffers
//!
//! Usage:
//!   demux info <file>                          - Show header and channel configs
//!   demux scan <file> [--config demux.toml]    - Decode the whole file, report stats
//!   demux scan <file> --dump                   - Also print records as JSON lines

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use llamadaq_rs::buffer::RawBufferPool;
use llamadaq_rs::config::Config;
use llamadaq_rs::header::HeaderDecoder;
use llamadaq_rs::streamer::LlamaStreamer;

#[derive(Parser)]
#[command(name = "demux")]
#[command(about = "Streaming decoder for llamaDAQ SIS3316 data files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show file header and channel configurations
    Info {
        /// Path to the llamaDAQ file
        file: PathBuf,
    },

    /// Decode the whole file and report per-channel statistics
    Scan {
        /// Path to the llamaDAQ file
        file: PathBuf,

        /// Optional TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print every flushed record as a JSON line
        #[arg(long)]
        dump: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("llamadaq_rs=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { file } => show_info(&file),
        Commands::Scan { file, config, dump } => scan_file(&file, config, dump),
    }
}

fn show_info(path: &PathBuf) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let (header, table, n_bytes) = HeaderDecoder::new().decode_header(&mut reader)?;

    println!("File:            {}", path.display());
    println!("Format version:  {}", header.version());
    println!("Channels open:   {}", header.n_channels_open);
    println!("Header bytes:    {}", n_bytes);
    println!();
    println!("  fch  fadc  ch  evt_len  samples  avg  fmt   freq (MHz)");
    for (fch_id, config) in table.iter() {
        println!(
            "  {:3}  {:4}  {:2}  {:7}  {:7}  {:3}  0x{:x}   {:.1}{}",
            fch_id,
            config.fadc_index,
            config.channel_index,
            config.event_length,
            config.sample_length,
            config.avg_sample_length,
            config.format_bits,
            config.sample_freq,
            if config.is_open { "" } else { "  (non-open!)" },
        );
    }
    Ok(())
}

fn scan_file(path: &PathBuf, config_path: Option<PathBuf>, dump: bool) -> anyhow::Result<()> {
    let config = match config_path {
        Some(p) => Config::load(&p).with_context(|| format!("loading {}", p.display()))?,
        None => Config::default(),
    };
    let dump = dump || config.output.dump_records;

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut streamer = LlamaStreamer::new();
    let header = streamer.open_stream(BufReader::new(file))?;
    info!(version = %header.version(), "opened stream");

    let mut pool = match config.load_pool_layout()? {
        Some(layout) => RawBufferPool::from_layout(&layout)?,
        None => RawBufferPool::from_table(streamer.channel_configs(), config.stream.buffer_capacity),
    };

    let mut per_channel: BTreeMap<u32, u64> = BTreeMap::new();
    let mut n_flushes = 0u64;
    while streamer.read_packet(&mut pool)? {
        if streamer.any_buffer_full() {
            n_flushes += 1;
            flush_pool(&mut pool, &mut per_channel, dump)?;
            streamer.clear_full_flag();
        }
    }
    // trailing partial buffers
    flush_pool(&mut pool, &mut per_channel, dump)?;

    println!("Packets read:    {}", streamer.packet_id());
    println!("Bytes read:      {}", streamer.n_bytes_read());
    println!("Buffer flushes:  {}", n_flushes);
    if streamer.n_skipped() > 0 {
        println!("Skipped records: {}", streamer.n_skipped());
    }
    println!();
    println!("  fch  records");
    for (fch_id, count) in &per_channel {
        println!("  {fch_id:3}  {count}");
    }
    Ok(())
}

fn flush_pool(
    pool: &mut RawBufferPool,
    per_channel: &mut BTreeMap<u32, u64>,
    dump: bool,
) -> anyhow::Result<()> {
    for buffer in pool.iter_mut() {
        for record in buffer.take_records() {
            *per_channel.entry(record.fch_id).or_default() += 1;
            if dump {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }
    Ok(())
}
