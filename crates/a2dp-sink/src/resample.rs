//! PCM conversion for the CPAL sink: 16-bit LE bytes in, device-layout `f32` out.
//!
//! Channel mapping happens first, then Rubato converts from the negotiated stream rate
//! to the rate the device is actually running at (only when the two differ).

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Converts PCM written by the pipeline into the device's sample layout.
pub(crate) struct PcmConverter {
    src_channels: usize,
    dst_channels: usize,
    /// Bytes of an incomplete source frame, completed by the next call.
    partial: Vec<u8>,
    samples: Vec<f32>,
    mapped: Vec<f32>,
    resampler: Option<StreamResampler>,
}

impl PcmConverter {
    pub(crate) fn new(
        src_rate: u32,
        src_channels: usize,
        dst_rate: u32,
        dst_channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        let dst_channels = dst_channels.max(1);
        let resampler = if src_rate != dst_rate {
            tracing::info!(
                from_hz = src_rate,
                to_hz = dst_rate,
                "resampling to device rate"
            );
            Some(StreamResampler::new(src_rate, dst_rate, dst_channels, chunk_frames)?)
        } else {
            None
        };
        Ok(Self {
            src_channels: src_channels.max(1),
            dst_channels,
            partial: Vec::new(),
            samples: Vec::new(),
            mapped: Vec::new(),
            resampler,
        })
    }

    /// Take over the incomplete frame `old` was holding, so a format switch in the
    /// middle of a frame does not shift the channels that follow.
    pub(crate) fn inherit_partial(&mut self, old: &mut PcmConverter) {
        self.partial = std::mem::take(&mut old.partial);
    }

    /// Convert `bytes` and append the result to `out`.
    ///
    /// Only whole frames are converted; the tail of a frame split across writes is
    /// held back until the rest of it arrives.
    pub(crate) fn convert(&mut self, bytes: &[u8], out: &mut Vec<f32>) -> Result<()> {
        let frame_bytes = self.src_channels * 2;
        self.partial.extend_from_slice(bytes);
        let whole = self.partial.len() - self.partial.len() % frame_bytes;
        if whole == 0 {
            return Ok(());
        }

        self.samples.clear();
        self.samples.extend(
            self.partial[..whole]
                .chunks_exact(2)
                .map(|p| i16_to_f32(i16::from_le_bytes([p[0], p[1]]))),
        );
        self.partial.drain(..whole);

        self.mapped.clear();
        map_channels(&self.samples, self.src_channels, self.dst_channels, &mut self.mapped);
        match &mut self.resampler {
            Some(r) => r.process(&self.mapped, out),
            None => {
                out.extend_from_slice(&self.mapped);
                Ok(())
            }
        }
    }
}

fn i16_to_f32(s: i16) -> f32 {
    f32::from(s) / 32_768.0
}

/// Remap interleaved frames from `src` to `dst` channels.
///
/// mono → N duplicates, N → mono averages, otherwise channels are truncated or padded
/// with the last source channel. `input` holds whole frames.
fn map_channels(input: &[f32], src: usize, dst: usize, out: &mut Vec<f32>) {
    if src == dst {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(src) {
        if dst == 1 {
            out.push(frame.iter().sum::<f32>() / src as f32);
        } else {
            out.extend((0..dst).map(|ch| frame[ch.min(src - 1)]));
        }
    }
}

/// Fixed-input-chunk sinc resampler fed with arbitrarily sized writes.
struct StreamResampler {
    inner: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl StreamResampler {
    fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let f_ratio = f64::from(dst_rate) / f64::from(src_rate);
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let chunk_frames = chunk_frames.max(1);
        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;

        // Headroom for the ratio plus the relative adjustment range.
        let max_out_frames = (chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + 64;
        Ok(Self {
            inner,
            channels,
            chunk_frames,
            pending: Vec::new(),
            scratch: vec![0.0; max_out_frames * channels],
        })
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: None,
        };
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let chunk = &self.pending[consumed..consumed + chunk_samples];
            let input_adapter = InterleavedSlice::new(chunk, self.channels, self.chunk_frames)
                .map_err(|e| anyhow!("resampler input: {e}"))?;
            let out_frames = self.scratch.len() / self.channels;
            let mut output_adapter =
                InterleavedSlice::new_mut(&mut self.scratch, self.channels, out_frames)
                    .map_err(|e| anyhow!("resampler output: {e}"))?;
            let (_nbr_in, nbr_out) = self
                .inner
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| anyhow!("resampler process: {e}"))?;
            out.extend_from_slice(&self.scratch[..nbr_out * self.channels]);
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(())
    }
}
