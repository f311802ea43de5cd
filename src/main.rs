//! CLI entry point for stimgen.
//!
//! A headless shell over the engine, running against the simulated chassis:
//!
//! - `devices` — enumerate the cards the backend reports
//! - `rates` — advise sample rates for every selectable entry of a
//!   frequency table
//! - `run` — enable channels, generate, and print live RMS/peak
//!
//! ```bash
//! stimgen devices
//! stimgen rates config/frequencies.csv
//! stimgen run --frequency 1000 --amplitude-uv 1000000 --seconds 5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stimgen::advisor;
use stimgen::app::StimApp;
use stimgen::config::StimConfig;
use stimgen::frequency::FrequencyTable;
use stimgen::hardware::mock::MockChassis;
use stimgen::hardware::SignalBackend;
use stimgen::measurement;
use stimgen::telemetry;

#[derive(Parser)]
#[command(name = "stimgen")]
#[command(about = "Multi-card sine stimulus bench (simulated hardware)", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults to the built-in SV1..SV4 layout
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the cards the backend reports
    Devices,

    /// Advise sample rates for the selectable entries of a frequency table
    Rates {
        /// Path to the CSV frequency table
        table: PathBuf,
    },

    /// Generate on the simulated chassis and print live measurements
    Run {
        /// Output frequency, Hz
        #[arg(long, default_value_t = 1_000.0)]
        frequency: f64,

        /// Drive amplitude for every enabled channel, microvolts
        #[arg(long, default_value_t = 1_000_000.0)]
        amplitude_uv: f64,

        /// Channels to enable on every card
        #[arg(long, value_delimiter = ',', default_value = "0")]
        channels: Vec<usize>,

        /// How long to generate before stopping
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Uniform loopback noise, microvolts
        #[arg(long, default_value_t = 2_000.0)]
        noise_uv: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StimConfig::load_from(path)?,
        None => StimConfig::default(),
    };
    telemetry::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Devices => list_devices(&config).await,
        Commands::Rates { table } => advise_rates(&table),
        Commands::Run {
            frequency,
            amplitude_uv,
            channels,
            seconds,
            noise_uv,
        } => run_demo(config, frequency, amplitude_uv, &channels, seconds, noise_uv).await,
    }
}

async fn list_devices(config: &StimConfig) -> Result<()> {
    let chassis = MockChassis::new(&config.cards);
    for card in chassis.list_cards().await? {
        println!(
            "{:<6} {:<18} {} AO channels (mirrored AI)",
            card.id, card.product, card.channels
        );
    }
    Ok(())
}

fn advise_rates(table: &Path) -> Result<()> {
    let table = FrequencyTable::load(table)?;
    if table.is_empty() {
        println!("No usable rows in the frequency table.");
        return Ok(());
    }
    for option in table.selectable() {
        let advice = advisor::advise(option.frequency)?;
        println!(
            "{:<14} {:>10.1} Hz -> {:>9.0} S/s  {:>7.1} samples/cycle  [{}]",
            option.name,
            option.frequency,
            advice.sample_rate,
            advice.samples_per_cycle,
            advice.quality
        );
    }
    Ok(())
}

async fn run_demo(
    config: StimConfig,
    frequency: f64,
    amplitude_uv: f64,
    channels: &[usize],
    seconds: u64,
    noise_uv: f64,
) -> Result<()> {
    let backend = Arc::new(MockChassis::new(&config.cards).with_noise_uv(noise_uv));
    let app = StimApp::new(config, backend)?;

    let cards = app.registry().cards();
    for card in &cards {
        for &channel in channels {
            app.set_channel(card, channel, true, amplitude_uv)?;
        }
    }

    let advice = app.start_generation(frequency).await?;
    println!(
        "Generating {frequency} Hz at {:.0} S/s ({:.1} samples/cycle, {})",
        advice.sample_rate, advice.samples_per_cycle, advice.quality
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    poll.tick().await; // first tick is immediate
    let ceiling_v = app.config().hardware.max_amplitude_uv * 1e-6;
    while tokio::time::Instant::now() < deadline {
        poll.tick().await;
        for card in &cards {
            for &channel in channels {
                let m = app.channel_measurement(card, channel)?;
                let trace = app.scope_snapshot(card, channel)?;
                let clipped = trace
                    .iter()
                    .filter(|&&s| measurement::is_clipping(s, ceiling_v, 0.1))
                    .count();
                let flag = if clipped > 0 { "  CLIP" } else { "" };
                println!(
                    "{card}/ai{channel}: rms {:>8.4} V  peak {:>8.4} V{flag}",
                    m.stats.rms, m.stats.peak
                );
            }
        }
    }

    app.stop_generation().await;
    println!("Stopped; all sessions released.");
    Ok(())
}
