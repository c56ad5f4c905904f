//! a2dp-sink: the receiving end of a Bluetooth audio stream.
//!
//! Decoded PCM arrives from the transport stack, is buffered against radio jitter,
//! and is written to a CPAL output device. `replay` drives the sink with a simulated
//! peer that streams a local audio file.

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use a2dp_sink::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,a2dp_sink=info,a2dp_pipeline=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = args.sink_config();
    match args.replay_config() {
        Some(replay) => runtime::run_replay(config, replay),
        None => bail!("no transport configured; run `a2dp-sink replay <FILE>` or pass --list-devices"),
    }
}
