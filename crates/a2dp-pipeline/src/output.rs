//! Output sink contract.
//!
//! The physical output (I2S DAC, host audio device, ...) is driven through this
//! synchronous interface. Implementations use interior synchronization because the
//! session worker (configure/enable/disable) and the output writer (write) call in
//! from different threads.

use anyhow::{Result, bail};

use a2dp_sink_types::SinkFormat;

pub trait OutputSink: Send + Sync {
    /// Swap sample rate and slot configuration.
    ///
    /// May be called while enabled; data already queued upstream is not affected.
    fn configure(&self, format: SinkFormat) -> Result<()>;

    /// Allocate and start output resources.
    ///
    /// Called ahead of the first audio burst so that hardware setup does not eat into
    /// the stream.
    fn enable(&self) -> Result<()>;

    /// Stop output and release resources.
    ///
    /// Must unblock a concurrent [`OutputSink::write`].
    fn disable(&self) -> Result<()>;

    /// Write 16-bit little-endian interleaved PCM.
    ///
    /// Blocks at most for as long as the hardware needs to consume earlier data.
    /// Returns the number of bytes taken.
    fn write(&self, data: &[u8]) -> Result<usize>;
}

/// Write all of `data`, retrying short writes.
pub(crate) fn write_all(sink: &dyn OutputSink, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = sink.write(data)?;
        if n == 0 {
            bail!("output sink accepted no data");
        }
        data = &data[n.min(data.len())..];
    }
    Ok(())
}
