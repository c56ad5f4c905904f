//! CPAL-backed output sink.
//!
//! CPAL streams are not `Send`, so each enable spawns an output thread that opens the
//! device, owns the stream, and keeps it alive until the sink is disabled. `write`
//! converts PCM into the device layout and blocks on a bounded queue that the stream
//! callback drains.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use a2dp_pipeline::output::OutputSink;
use a2dp_sink_types::SinkFormat;

use crate::config::OutputConfig;
use crate::device;
use crate::pcm::{PcmQueue, samples_for_millis};
use crate::resample::PcmConverter;

/// Output sink playing through a CPAL device.
pub struct CpalSink {
    cfg: OutputConfig,
    state: Mutex<SinkState>,
}

struct SinkState {
    format: SinkFormat,
    output: Option<Arc<ActiveOutput>>,
}

struct ActiveOutput {
    queue: Arc<PcmQueue>,
    device_rate: u32,
    converter: Mutex<PcmConverter>,
    stop_tx: Sender<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct DeviceReady {
    queue: Arc<PcmQueue>,
    rate: u32,
    channels: usize,
}

impl CpalSink {
    pub fn new(cfg: OutputConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(SinkState {
                format: SinkFormat::DEFAULT,
                output: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn converter_for(&self, format: SinkFormat, rate: u32, channels: usize) -> Result<PcmConverter> {
        PcmConverter::new(
            format.sample_rate,
            usize::from(format.channels),
            rate,
            channels,
            self.cfg.chunk_frames,
        )
    }
}

impl OutputSink for CpalSink {
    fn configure(&self, format: SinkFormat) -> Result<()> {
        let mut g = self.lock();
        g.format = format;
        if let Some(out) = &g.output {
            // The device keeps running; only the conversion into it changes.
            let mut converter =
                self.converter_for(format, out.device_rate, out.queue.channels())?;
            let mut current = out.converter.lock().unwrap_or_else(PoisonError::into_inner);
            converter.inherit_partial(&mut current);
            *current = converter;
        }
        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            "output format set"
        );
        Ok(())
    }

    fn enable(&self) -> Result<()> {
        let mut g = self.lock();
        if g.output.is_some() {
            return Ok(());
        }
        let format = g.format;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let cfg = self.cfg.clone();
        let thread = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || output_thread(cfg, format, ready_tx, stop_rx))
            .context("spawn output thread")?;

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited during setup"))
            .and_then(|r: Result<DeviceReady>| r);
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                let _ = thread.join();
                return Err(e);
            }
        };
        let converter = self.converter_for(format, ready.rate, ready.channels)?;
        g.output = Some(Arc::new(ActiveOutput {
            queue: ready.queue,
            device_rate: ready.rate,
            converter: Mutex::new(converter),
            stop_tx,
            thread: Mutex::new(Some(thread)),
        }));
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        let Some(out) = self.lock().output.take() else {
            return Ok(());
        };
        let dropped_frames = out.queue.len_frames();
        out.queue.close();
        let _ = out.stop_tx.send(());
        let thread = out
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                bail!("output thread panicked");
            }
        }
        tracing::info!(dropped_frames, "output disabled");
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        // Clone the handle so a blocked write does not hold the state lock.
        let Some(out) = self.lock().output.clone() else {
            bail!("output is disabled");
        };
        if out.queue.is_closed() {
            bail!("output is closing");
        }
        let mut samples = Vec::with_capacity(data.len());
        out.converter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .convert(data, &mut samples)?;
        if !out.queue.push_blocking(&samples) {
            bail!("output closed during write");
        }
        Ok(data.len())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Err(e) = self.disable() {
            tracing::warn!("output teardown failed: {e:#}");
        }
    }
}

fn output_thread(
    cfg: OutputConfig,
    format: SinkFormat,
    ready_tx: Sender<Result<DeviceReady>>,
    stop_rx: Receiver<()>,
) {
    let stream = match open_stream(&cfg, format) {
        Ok((stream, ready)) => {
            let _ = ready_tx.send(Ok(ready));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    // Either a stop request or the sink going away ends the stream.
    let _ = stop_rx.recv();
    if let Err(e) = stream.pause() {
        tracing::debug!("stream pause on teardown: {e}");
    }
    drop(stream);
}

fn open_stream(cfg: &OutputConfig, format: SinkFormat) -> Result<(cpal::Stream, DeviceReady)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, cfg.device.as_deref())?;
    let supported = device::pick_output_config(&device, format.sample_rate, format.channels)?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buffer_size;
    }
    let channels = usize::from(stream_config.channels);
    let rate = stream_config.sample_rate;
    let queue = Arc::new(PcmQueue::new(
        channels,
        samples_for_millis(rate, channels, cfg.queue_millis),
    ));

    tracing::info!(
        device = %device.description()?,
        rate_hz = rate,
        channels,
        sample_format = ?supported.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "output device opened"
    );

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, &queue, cfg)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, &queue, cfg)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, &queue, cfg)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, &queue, cfg)?,
        other => bail!("unsupported sample format: {other:?}"),
    };
    stream.play().context("start output stream")?;
    Ok((
        stream,
        DeviceReady {
            queue,
            rate,
            channels,
        },
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<PcmQueue>,
    cfg: &OutputConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = usize::from(config.channels);
    let refill_max_frames = cfg.refill_max_frames.max(1);
    let queue = queue.clone();
    let mut local: Vec<f32> = Vec::with_capacity(refill_max_frames * channels);
    let mut pos = 0usize;
    let mut underruns = 0u64;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let mut i = 0;
            while i < data.len() {
                if pos >= local.len() {
                    local.clear();
                    pos = 0;
                    if queue.pop_into(&mut local, refill_max_frames) == 0 {
                        // Silence until the next callback.
                        data[i..].fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                        underruns += 1;
                        if underruns.is_power_of_two() {
                            tracing::debug!(underruns, "output callback underrun");
                        }
                        return;
                    }
                }
                data[i] = <T as cpal::Sample>::from_sample::<f32>(local[pos]);
                pos += 1;
                i += 1;
            }
        },
        |err| tracing::warn!("stream error: {err}"),
        None,
    )?;
    Ok(stream)
}
