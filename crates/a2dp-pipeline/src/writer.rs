//! Output writer loop: the single consumer of the streaming buffer.
//!
//! The writer drains the buffer in `drain_chunk_bytes` pieces and pushes them into
//! the sink. A drain that times out flips the buffer to prefetching; the writer then
//! parks on [`StreamBuffer::wait_resume`] until the producer side has refilled the
//! buffer past the high watermark (or overflowed it).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use crate::buffer::StreamBuffer;
use crate::config::PipelineConfig;
use crate::event::SinkEvent;
use crate::output::{OutputSink, write_all};

/// A writer that stopped because the sink failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFailure {
    pub generation: u64,
    pub error: String,
}

impl From<OutputFailure> for SinkEvent {
    fn from(f: OutputFailure) -> Self {
        SinkEvent::OutputFailed {
            generation: f.generation,
            error: f.error,
        }
    }
}

/// A live streaming buffer plus the writer thread draining it.
pub struct Pipeline {
    buffer: Arc<StreamBuffer>,
    writer: Option<JoinHandle<()>>,
    generation: u64,
}

impl Pipeline {
    /// Create the buffer and spawn its writer.
    ///
    /// A sink write failure is reported on `failures`, tagged with `generation`.
    /// The channel must be unbounded: the receiver may be joining this writer.
    pub fn start(
        cfg: &PipelineConfig,
        sink: Arc<dyn OutputSink>,
        failures: Sender<OutputFailure>,
        generation: u64,
    ) -> Result<Self> {
        let buffer = Arc::new(StreamBuffer::from_config(cfg));
        let chunk_bytes = cfg.drain_chunk_bytes;
        let drain_timeout = cfg.drain_timeout;

        let buffer_thread = buffer.clone();
        let writer = thread::Builder::new()
            .name(format!("sink-writer-{generation}"))
            .spawn(move || {
                if let Err(e) = writer_loop(&buffer_thread, sink.as_ref(), chunk_bytes, drain_timeout)
                {
                    tracing::error!(generation, "output write failed: {e:#}");
                    let _ = failures.send(OutputFailure {
                        generation,
                        error: format!("{e:#}"),
                    });
                }
                tracing::debug!(generation, "output writer exited");
            })
            .context("spawn output writer thread")?;

        tracing::info!(
            generation,
            capacity = cfg.capacity_bytes,
            chunk_bytes,
            "streaming pipeline started"
        );
        Ok(Self {
            buffer,
            writer: Some(writer),
            generation,
        })
    }

    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the writer and leave the sink disabled.
    ///
    /// Safe while the writer is blocked in a drain (closing the buffer wakes it) or in
    /// a sink write (disabling the sink unblocks it).
    pub fn shutdown(mut self, sink: &dyn OutputSink) {
        self.buffer.close();
        if let Err(e) = sink.disable() {
            tracing::warn!(generation = self.generation, "sink disable failed: {e:#}");
        }
        if let Some(join) = self.writer.take() {
            if join.join().is_err() {
                tracing::error!(generation = self.generation, "output writer panicked");
            }
        }
        let stats = self.buffer.stats();
        tracing::info!(
            generation = self.generation,
            appended_bytes = stats.appended_bytes,
            dropped_payloads = stats.dropped_payloads,
            overflows = stats.overflows,
            underruns = stats.underruns,
            "streaming pipeline stopped"
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // A pipeline dropped without `shutdown` still must not leave its writer parked.
        self.buffer.close();
    }
}

/// Drain `buffer` into `sink` until the buffer is closed.
///
/// Returns an error only for a sink failure that was not caused by teardown.
fn writer_loop(
    buffer: &StreamBuffer,
    sink: &dyn OutputSink,
    chunk_bytes: usize,
    drain_timeout: Duration,
) -> Result<()> {
    let mut chunk = vec![0u8; chunk_bytes.max(1)];
    loop {
        if !buffer.wait_resume() {
            return Ok(());
        }
        loop {
            let n = buffer.drain_into(&mut chunk, drain_timeout);
            if n == 0 {
                if buffer.is_closed() {
                    return Ok(());
                }
                // Underrun: the buffer is prefetching now; wait for the refill.
                break;
            }
            if let Err(e) = write_all(sink, &chunk[..n]) {
                if buffer.is_closed() {
                    return Ok(());
                }
                return Err(e);
            }
        }
    }
}
