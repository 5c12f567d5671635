//! pcm-play — play a tone or a raw 16-bit PCM file through the pcm-engine.
//!
//! By default playback is asynchronous: `play16` returns at once and the main
//! thread pumps the engine until the sound has finished or Ctrl-C stops it.
//! `--background` blocks inside the engine instead (Ctrl-C still interrupts),
//! and `--batch` plays synchronously.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pcm_play::{cli, config::PlayConfig, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pcm_play=info,pcm_engine=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = PlayConfig::from_args(&args)?;
    runtime::run_play(config)?;
    Ok(())
}
