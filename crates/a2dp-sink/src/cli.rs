use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use a2dp_sink_types::PeerAddress;

use crate::config::{OutputConfig, PipelineConfig, ReplayConfig, SinkConfig};

#[derive(Parser, Debug)]
#[command(name = "a2dp-sink", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// File remembering the last connected peer
    #[arg(long, default_value = "a2dp-sink-peer.json")]
    pub store: PathBuf,

    /// Reconnect to the last peer every N seconds while disconnected (0 disables)
    #[arg(long, default_value_t = 10)]
    pub reconnect_secs: u64,

    /// Streaming buffer capacity in bytes
    #[arg(long, default_value_t = 32 * 1024)]
    pub capacity_bytes: usize,

    /// Occupancy at which dropping stops (bytes)
    #[arg(long, default_value_t = 20 * 1024)]
    pub low_watermark_bytes: usize,

    /// Occupancy at which prefetching ends (bytes)
    #[arg(long, default_value_t = 20 * 1024)]
    pub high_watermark_bytes: usize,

    /// Bytes handed to the output per write
    #[arg(long, default_value_t = 240 * 6)]
    pub chunk_bytes: usize,

    /// Drain wait before an underrun is declared (ms)
    #[arg(long, default_value_t = 20)]
    pub drain_timeout_ms: u64,

    /// Extra output delay reported to the peer (1/10 ms)
    #[arg(long, default_value_t = 50)]
    pub delay_offset: u16,

    /// Device queue length in milliseconds
    #[arg(long, default_value_t = 100)]
    pub output_queue_ms: u32,

    /// Initial absolute volume (0-127)
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u8).range(0..=127))]
    pub volume: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sink against a simulated peer streaming a local file
    Replay {
        /// Path to an audio file
        path: PathBuf,

        /// Address the simulated peer reports
        #[arg(long, default_value = "AA:BB:CC:DD:EE:FF")]
        peer: PeerAddress,

        /// Packets delivered back-to-back per burst
        #[arg(long, default_value_t = 8)]
        burst_packets: usize,

        /// PCM bytes per packet
        #[arg(long, default_value_t = 512)]
        packet_bytes: usize,
    },
}

impl Args {
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            pipeline: PipelineConfig {
                capacity_bytes: self.capacity_bytes,
                low_watermark_bytes: self.low_watermark_bytes,
                high_watermark_bytes: self.high_watermark_bytes,
                drain_chunk_bytes: self.chunk_bytes,
                drain_timeout: Duration::from_millis(self.drain_timeout_ms),
                delay_offset: self.delay_offset,
                ..PipelineConfig::default()
            },
            output: OutputConfig {
                device: self.device.clone(),
                queue_millis: self.output_queue_ms,
                ..OutputConfig::default()
            },
            store_path: self.store.clone(),
            reconnect_interval: (self.reconnect_secs > 0)
                .then(|| Duration::from_secs(self.reconnect_secs)),
            initial_volume: self.volume,
        }
    }

    pub fn replay_config(&self) -> Option<ReplayConfig> {
        match &self.cmd {
            Some(Command::Replay {
                path,
                peer,
                burst_packets,
                packet_bytes,
            }) => Some(ReplayConfig {
                path: path.clone(),
                peer: *peer,
                burst_packets: (*burst_packets).max(1),
                packet_bytes: (*packet_bytes).max(4),
            }),
            None => None,
        }
    }
}
