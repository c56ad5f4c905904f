//! Simulated peer: plays a local audio file into the sink as if a phone were
//! streaming it.
//!
//! The peer reports the usual stack events (profile init, connect, codec config,
//! audio start), answers directives the way a real stack would, and delivers the
//! file's PCM through the data path in bursts paced to real time.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use a2dp_pipeline::codec::{CodecKind, SbcConfig};
use a2dp_pipeline::event::{Directive, EventSender, SinkEvent, Transport};
use a2dp_pipeline::remote::{
    MetadataMask, NotificationCaps, NotificationKind, RemoteCommand, RemoteEvent,
};
use a2dp_pipeline::session::DataPath;
use a2dp_sink_types::{AudioState, ConnectionState, PeerAddress, SinkFormat};

use crate::config::ReplayConfig;

/// How long the peer waits for the sink to reconnect before connecting on its own.
const CONNECT_WAIT: Duration = Duration::from_secs(2);
/// Default delay the simulated stack reports (1/10 ms).
const STACK_DELAY: u16 = 150;
const DIRECTIVE_QUEUE_DEPTH: usize = 64;

/// Transport handing directives to the simulated peer. Never blocks the caller.
pub struct ReplayTransport {
    tx: Sender<Directive>,
}

impl Transport for ReplayTransport {
    fn send(&self, directive: Directive) -> Result<()> {
        self.tx.try_send(directive).map_err(|e| match e {
            TrySendError::Full(d) => anyhow!("replay peer busy; dropped {d:?}"),
            TrySendError::Disconnected(d) => anyhow!("replay peer gone; dropped {d:?}"),
        })
    }
}

pub fn replay_transport() -> (ReplayTransport, Receiver<Directive>) {
    let (tx, rx) = crossbeam_channel::bounded(DIRECTIVE_QUEUE_DEPTH);
    (ReplayTransport { tx }, rx)
}

/// Totals reported when the replay finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub packets: u64,
    pub bytes_offered: u64,
    pub bytes_accepted: u64,
}

pub struct ReplayPeer {
    cfg: ReplayConfig,
    events: EventSender,
    data_path: DataPath,
    directives: Receiver<Directive>,
    stop: Arc<AtomicBool>,
    title: String,
}

impl ReplayPeer {
    pub fn new(
        cfg: ReplayConfig,
        events: EventSender,
        data_path: DataPath,
        directives: Receiver<Directive>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let title = cfg
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            cfg,
            events,
            data_path,
            directives,
            stop,
            title,
        }
    }

    pub fn run(self) -> Result<ReplayStats> {
        let mut source = PcmSource::open(&self.cfg.path)?;
        let format = source.format();
        let sbc = SbcConfig::for_format(format).ok_or_else(|| {
            anyhow!(
                "{} Hz is not an SBC sample rate (16000, 32000, 44100, 48000)",
                format.sample_rate
            )
        })?;
        tracing::info!(
            path = ?self.cfg.path,
            rate_hz = format.sample_rate,
            channels = format.channels,
            "replay source opened"
        );

        self.emit(SinkEvent::ProfileInitialized { success: true });
        let peer = self.await_connect().unwrap_or(self.cfg.peer);

        self.emit_connection(ConnectionState::Disconnected, ConnectionState::Connecting, peer);
        self.emit_connection(ConnectionState::Connecting, ConnectionState::Connected, peer);
        self.emit(SinkEvent::DelayReportSupport { supported: true });
        self.emit(SinkEvent::Remote(RemoteEvent::ControllerConnection {
            connected: true,
            peer,
        }));
        self.emit(SinkEvent::CodecConfigured {
            codec: CodecKind::Sbc,
            octets: sbc.octets().to_vec(),
        });
        self.emit(SinkEvent::AudioState(AudioState::Started));
        if !self.wait_for(|| self.data_path.buffered().is_some()) {
            tracing::warn!("sink pipeline not attached; streaming anyway");
        }

        let stats = self.stream(&mut source, format)?;

        self.emit(SinkEvent::AudioState(AudioState::Suspended));
        self.wait_for_drain();
        self.emit(SinkEvent::Remote(RemoteEvent::ControllerConnection {
            connected: false,
            peer,
        }));
        self.emit_connection(ConnectionState::Connected, ConnectionState::Disconnecting, peer);
        self.emit_connection(ConnectionState::Disconnecting, ConnectionState::Disconnected, peer);
        tracing::info!(
            packets = stats.packets,
            offered = stats.bytes_offered,
            accepted = stats.bytes_accepted,
            "replay finished"
        );
        Ok(stats)
    }

    fn stream(&self, source: &mut PcmSource, format: SinkFormat) -> Result<ReplayStats> {
        let bytes_per_sec = f64::from(format.sample_rate) * format.bytes_per_frame() as f64;
        let packet_bytes = self.cfg.packet_bytes - self.cfg.packet_bytes % format.bytes_per_frame();
        let start = Instant::now();
        let mut stats = ReplayStats::default();
        let mut pcm = Vec::new();
        let mut eof = false;
        let mut burst = 0usize;

        while !self.stopped() {
            let burst_bytes = packet_bytes * burst_len(burst, self.cfg.burst_packets);
            burst += 1;
            while !eof && pcm.len() < burst_bytes {
                eof = !source.next_pcm(&mut pcm)?;
            }
            if pcm.is_empty() {
                break;
            }
            let take = burst_bytes.min(pcm.len());
            for packet in pcm[..take].chunks(packet_bytes.max(1)) {
                stats.packets += 1;
                stats.bytes_offered += packet.len() as u64;
                stats.bytes_accepted += self.data_path.deliver(packet) as u64;
            }
            pcm.drain(..take);
            self.pump_directives();

            // Burst ahead of the clock, then wait for playback to catch up.
            let due = Duration::from_secs_f64(stats.bytes_offered as f64 / bytes_per_sec);
            if let Some(wait) = due.checked_sub(start.elapsed()) {
                thread::sleep(wait);
            }
        }
        Ok(stats)
    }

    /// Answer directives until the sink asks to connect or the wait runs out.
    fn await_connect(&self) -> Option<PeerAddress> {
        let deadline = Instant::now() + CONNECT_WAIT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.directives.recv_timeout(left) {
                Ok(Directive::Connect(peer)) => {
                    tracing::info!(%peer, "sink requested connection");
                    return Some(peer);
                }
                Ok(other) => self.respond(other),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::info!("no reconnect request; initiating connection");
                    return None;
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn pump_directives(&self) {
        while let Ok(directive) = self.directives.try_recv() {
            self.respond(directive);
        }
    }

    fn respond(&self, directive: Directive) {
        match directive {
            Directive::GetDelayValue => {
                self.emit(SinkEvent::DelayValueReported { value: STACK_DELAY });
            }
            Directive::SetDelayValue(value) => {
                self.emit(SinkEvent::DelayValueSet {
                    success: true,
                    value,
                });
            }
            Directive::Remote(RemoteCommand::GetCapabilities) => {
                let caps = NotificationCaps::default()
                    .with(NotificationKind::TrackChange)
                    .with(NotificationKind::PlayStatusChange)
                    .with(NotificationKind::PlayPosChanged);
                self.emit(SinkEvent::Remote(RemoteEvent::Capabilities(caps)));
            }
            Directive::Remote(RemoteCommand::RequestMetadata(mask)) => {
                if mask.contains(MetadataMask::TITLE) {
                    self.emit(SinkEvent::Remote(RemoteEvent::Metadata {
                        attr_id: MetadataMask::TITLE.bits(),
                        text: self.title.clone(),
                    }));
                }
            }
            Directive::Remote(RemoteCommand::Passthrough { key, pressed }) => {
                self.emit(SinkEvent::Remote(RemoteEvent::PassthroughResponse {
                    key: key.code(),
                    pressed,
                    code: 0x09,
                }));
            }
            other => tracing::debug!(directive = ?other, "replay peer ignoring directive"),
        }
    }

    /// Give the sink time to play out what is still buffered.
    fn wait_for_drain(&self) {
        self.wait_for(|| self.data_path.buffered().unwrap_or(0) == 0);
    }

    fn wait_for(&self, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && !self.stopped() {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn emit_connection(&self, old: ConnectionState, new: ConnectionState, peer: PeerAddress) {
        self.emit(SinkEvent::ConnectionState { old, new, peer });
    }

    fn emit(&self, event: SinkEvent) {
        self.events.send(event);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Packets in burst `n`: cycles irregularly through `1..=max` like radio scheduling.
fn burst_len(n: usize, max: usize) -> usize {
    (n * 7 + 3) % max.max(1) + 1
}

/// Streaming decoder producing 16-bit LE interleaved PCM, at most two channels.
struct PcmSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: SinkFormat,
    src_channels: usize,
}

impl PcmSource {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {path:?}"))?;
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("detect audio format of {path:?}"))?;
        let reader = probed.format;
        let track = reader
            .default_track()
            .ok_or_else(|| anyhow!("no default audio track"))?;
        let rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("unknown sample rate"))?;
        let src_channels = track
            .codec_params
            .channels
            .ok_or_else(|| anyhow!("unknown channel layout"))?
            .count();
        if src_channels == 0 {
            bail!("track has no channels");
        }
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("create decoder")?;
        let track_id = track.id;
        Ok(Self {
            reader,
            decoder,
            track_id,
            format: SinkFormat {
                sample_rate: rate,
                channels: src_channels.min(2) as u16,
            },
            src_channels,
        })
    }

    fn format(&self) -> SinkFormat {
        self.format
    }

    /// Append the next decoded packet to `out`; `false` at end of stream.
    fn next_pcm(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(_) => return Ok(false),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
            };
            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
            samples.copy_interleaved_ref(decoded);
            let keep = usize::from(self.format.channels);
            for frame in samples.samples().chunks_exact(self.src_channels) {
                for s in &frame[..keep] {
                    out.extend_from_slice(&s.to_le_bytes());
                }
            }
            return Ok(true);
        }
    }
}
