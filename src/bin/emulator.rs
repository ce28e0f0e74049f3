//! emulator - generate synthetic llamaDAQ files without hardware
//!
//! Usage:
//!   emulator --output test.llama                      # 2 channels, 1000 events
//!   emulator -o run42.llama -n 100000 -c 4 -s 2000    # bigger file, waveforms
//!   emulator -o bare.llama --no-waveforms             # header-only events

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use llamadaq_rs::emulator::{write_file, EmulatorChannel, EmulatorConfig};

#[derive(Parser)]
#[command(name = "emulator")]
#[command(about = "Generate synthetic llamaDAQ SIS3316 data files")]
#[command(version)]
struct Cli {
    /// Output file path
    #[arg(short, long)]
    output: PathBuf,

    /// Total number of events (spread round-robin across channels)
    #[arg(short, long, default_value_t = 1000)]
    n_events: u64,

    /// Number of open channels (all on FADC 0)
    #[arg(short, long, default_value_t = 2)]
    channels: u32,

    /// Raw waveform length in 16-bit samples (must be even)
    #[arg(short, long, default_value_t = 64)]
    sample_length: u32,

    /// Format bits for the optional event blocks (0x0 - 0xF)
    #[arg(short, long, default_value_t = 0xF)]
    format_bits: u32,

    /// Emit events without waveform samples
    #[arg(long)]
    no_waveforms: bool,

    /// RNG seed, for reproducible files
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("llamadaq_rs=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(cli.channels > 0, "need at least one channel");
    anyhow::ensure!(
        cli.sample_length % 2 == 0,
        "sample length must be even (samples pack in pairs into 32-bit words)"
    );

    let sample_length = if cli.no_waveforms {
        0
    } else {
        cli.sample_length
    };
    let config = EmulatorConfig {
        channels: (0..cli.channels)
            .map(|ch| EmulatorChannel {
                fadc_index: 0,
                channel_index: ch,
                format_bits: cli.format_bits & 0xF,
                sample_length,
                avg_sample_length: 0,
            })
            .collect(),
        n_events: cli.n_events,
        seed: cli.seed,
    };

    let n_bytes = write_file(&cli.output, &config)?;
    println!(
        "Wrote {} events ({} bytes) to {}",
        cli.n_events,
        n_bytes,
        cli.output.display()
    );
    Ok(())
}
