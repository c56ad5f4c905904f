use std::time::Duration;

use anyhow::{Result, bail};

/// Streaming and session tuning parameters.
///
/// These are fixed policy constants; nothing in the pipeline derives them at runtime.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Streaming buffer capacity in bytes.
    pub capacity_bytes: usize,
    /// Dropping → Processing once occupancy falls to or below this.
    pub low_watermark_bytes: usize,
    /// Prefetching → Processing once occupancy reaches this.
    pub high_watermark_bytes: usize,
    /// Max bytes handed to the sink per write.
    ///
    /// Matches the output DMA granularity (frames per descriptor × descriptors).
    pub drain_chunk_bytes: usize,
    /// How long one drain waits for data before reporting an underrun.
    pub drain_timeout: Duration,
    /// Depth of the session event queue.
    pub event_queue_depth: usize,
    /// How long an event producer may wait on a full queue before the event is dropped.
    pub event_send_timeout: Duration,
    /// Delay added by this application on top of the stack's own delay report (1/10 ms units).
    pub delay_offset: u16,
    /// Minimum reporting interval requested for play-position notifications.
    pub position_interval: u32,
    /// Log the audio packet counter every N packets.
    pub packet_log_interval: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 32 * 1024,
            low_watermark_bytes: 20 * 1024,
            high_watermark_bytes: 20 * 1024,
            drain_chunk_bytes: 240 * 6,
            drain_timeout: Duration::from_millis(20),
            event_queue_depth: 32,
            event_send_timeout: Duration::from_millis(10),
            delay_offset: 50,
            position_interval: 10,
            packet_log_interval: 100,
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the buffer policy cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.capacity_bytes == 0 {
            bail!("buffer capacity must be non-zero");
        }
        if self.low_watermark_bytes >= self.capacity_bytes {
            bail!(
                "low watermark ({}) must be below capacity ({})",
                self.low_watermark_bytes,
                self.capacity_bytes
            );
        }
        if self.high_watermark_bytes >= self.capacity_bytes {
            bail!(
                "high watermark ({}) must be below capacity ({})",
                self.high_watermark_bytes,
                self.capacity_bytes
            );
        }
        if self.drain_chunk_bytes == 0 {
            bail!("drain chunk must be non-zero");
        }
        if self.event_queue_depth == 0 {
            bail!("event queue depth must be non-zero");
        }
        if self.packet_log_interval == 0 {
            bail!("packet log interval must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity_bytes, 32_768);
        assert_eq!(cfg.drain_chunk_bytes, 1440);
    }

    #[test]
    fn watermark_at_capacity_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.high_watermark_bytes = cfg.capacity_bytes;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.low_watermark_bytes = cfg.capacity_bytes + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.capacity_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.drain_chunk_bytes = 0;
        assert!(cfg.validate().is_err());
    }
}
