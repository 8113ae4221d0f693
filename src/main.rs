//! Thin CLI orchestrator: parses a TOML config, starts the pipeline,
//! and waits for a shutdown signal or for every receiver to drop out of
//! a live state (spec §6's "CLI surface"). No DSP logic lives here.
//!
//! Grounded on `sgrams-trx-rs/src/trx-bin`'s `clap::Parser` shape, with
//! logging switched to the teacher's `log`/`env_logger` pair.

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;

use channelizer_core::config::PipelineConfig;
use channelizer_core::PipelineContext;

const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[derive(Debug, Parser)]
#[command(
    name = "channelizer",
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION
)]
struct Cli {
    /// Path to the pipeline's TOML configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: std::path::PathBuf,

    /// Run attached to the terminal instead of detaching (no-op placeholder
    /// for a service supervisor wrapper; both modes run the same loop).
    #[arg(long, conflicts_with = "service")]
    foreground: bool,

    /// Run as a background service (see `foreground`).
    #[arg(long)]
    service: bool,

    /// Parse the config, print the channel-to-bin assignment table, and
    /// exit without starting any receiver or output thread.
    #[arg(long)]
    diagnostic: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    log::info!(
        "starting in {} mode",
        if cli.service { "service" } else if cli.foreground { "foreground" } else { "foreground" }
    );

    let config = match PipelineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load config {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.diagnostic {
        print_diagnostic_table(&config);
        return ExitCode::SUCCESS;
    }

    let handle = match PipelineContext::start(config) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("pipeline failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            shutdown.store(true, Ordering::Release);
        }) {
            log::warn!("failed to install signal handler: {e}");
        }
    }

    while !shutdown.load(Ordering::Acquire) && handle.running_receivers() > 0 {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("stopping pipeline");
    handle.stop();
    handle.join();
    ExitCode::SUCCESS
}

fn print_diagnostic_table(config: &PipelineConfig) {
    println!("{:<10} {:<8} {:>12} {:>10}", "receiver", "channel", "freq_hz", "bin");
    for rc in &config.receivers {
        for ch in config.channels.iter().filter(|c| c.receiver_label == rc.label) {
            let bin = channelizer_core::channelizer::bin_for_frequency(
                ch.freq_hz,
                rc.center_freq_hz,
                rc.sample_rate as f64,
                rc.fft_size,
            );
            println!("{:<10} {:<8} {:>12} {:>10}", rc.label, ch.label, ch.freq_hz, bin);
        }
    }
}
