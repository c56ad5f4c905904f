use std::path::PathBuf;
use std::time::Duration;

pub use a2dp_pipeline::config::PipelineConfig;
use a2dp_sink_types::PeerAddress;

/// CPAL output tuning.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Output device substring; `None` selects the host default.
    pub device: Option<String>,
    /// Resampler input chunk in frames.
    pub chunk_frames: usize,
    /// Max frames the stream callback pulls per refill.
    pub refill_max_frames: usize,
    /// Device-side queue length; bounds how far `write` can run ahead of playback.
    pub queue_millis: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_frames: 256,
            refill_max_frames: 1024,
            queue_millis: 100,
        }
    }
}

/// Everything the sink runtime needs besides the transport.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    /// JSON file holding the last connected peer.
    pub store_path: PathBuf,
    /// Periodic reconnect while disconnected; `None` disables it.
    pub reconnect_interval: Option<Duration>,
    /// Absolute volume (0-127) reported before any peer sets one.
    pub initial_volume: u8,
}

/// Simulated peer for `replay`.
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub path: PathBuf,
    pub peer: PeerAddress,
    /// Packets delivered back-to-back per burst.
    pub burst_packets: usize,
    /// PCM bytes per packet.
    pub packet_bytes: usize,
}
