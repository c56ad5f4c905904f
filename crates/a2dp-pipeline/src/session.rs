//! Session state machine and the worker thread that serializes its events.
//!
//! The worker owns all session state. Only two things are shared with other threads:
//! the [`DataPath`] (payload delivery into the live buffer) and the published
//! [`SessionStatus`] snapshot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};

use a2dp_sink_types::{
    AudioState, ConnectionState, PeerAddress, SessionSnapshot, SinkFormat, UiStatus,
};

use crate::buffer::StreamBuffer;
use crate::codec::{CodecKind, sink_format_for};
use crate::config::PipelineConfig;
use crate::event::{Directive, EventSender, SinkEvent, Transport, event_channel, send_directive};
use crate::identity::DeviceIdentityStore;
use crate::output::OutputSink;
use crate::remote::{RemoteControl, VolumeControl, VolumeState};
use crate::status::{SessionStatus, StatusIndicator};
use crate::writer::{OutputFailure, Pipeline};

/// Producer side of the streaming buffer.
///
/// Cloned into the transport's payload callback. Delivery never blocks: without a
/// live pipeline the payload is counted and discarded.
#[derive(Clone)]
pub struct DataPath {
    current: Arc<RwLock<Option<Arc<StreamBuffer>>>>,
    packets: Arc<AtomicU32>,
    log_interval: u32,
}

impl DataPath {
    pub fn new(log_interval: u32) -> Self {
        Self {
            current: Arc::default(),
            packets: Arc::default(),
            log_interval,
        }
    }

    /// Hand one decoded payload to the live buffer. Returns the bytes accepted.
    pub fn deliver(&self, payload: &[u8]) -> usize {
        let n = self.packets.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if self.log_interval > 0 && n % self.log_interval == 0 {
            tracing::info!(packets = n, "audio packets received");
        }
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(buffer) => buffer.append(payload),
            None => 0,
        }
    }

    pub fn packets(&self) -> u32 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Live buffer occupancy; `None` while no pipeline is attached.
    pub fn buffered(&self) -> Option<usize> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.as_ref().map(|buffer| buffer.len())
    }

    fn attach(&self, buffer: Arc<StreamBuffer>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(buffer);
    }

    fn detach(&self) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn reset_packets(&self) {
        self.packets.store(0, Ordering::Relaxed);
    }
}

/// Collaborators the session drives.
pub struct SessionDeps {
    pub sink: Arc<dyn OutputSink>,
    pub transport: Arc<dyn Transport>,
    pub store: DeviceIdentityStore,
    pub status: StatusIndicator,
    pub volume: Arc<VolumeState>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Session {
    cfg: PipelineConfig,
    connection: ConnectionState,
    audio: AudioState,
    peer: Option<PeerAddress>,
    format: Option<SinkFormat>,
    pipeline: Option<Pipeline>,
    generation: u64,
    sink_enabled: bool,
    sink: Arc<dyn OutputSink>,
    transport: Arc<dyn Transport>,
    store: DeviceIdentityStore,
    status: StatusIndicator,
    remote: RemoteControl,
    data_path: DataPath,
    failures: Sender<OutputFailure>,
    published: SessionStatus,
}

impl Session {
    pub(crate) fn new(
        cfg: PipelineConfig,
        deps: SessionDeps,
        failures: Sender<OutputFailure>,
        data_path: DataPath,
        published: SessionStatus,
    ) -> Self {
        let remote = RemoteControl::new(
            deps.transport.clone(),
            deps.status.clone(),
            deps.volume,
            cfg.position_interval,
        );
        Self {
            cfg,
            connection: ConnectionState::Disconnected,
            audio: AudioState::Stopped,
            peer: None,
            format: None,
            pipeline: None,
            generation: 0,
            sink_enabled: false,
            sink: deps.sink,
            transport: deps.transport,
            store: deps.store,
            status: deps.status,
            remote,
            data_path,
            failures,
            published,
        }
    }

    pub(crate) fn handle(&mut self, event: SinkEvent) -> Flow {
        let flow = match event {
            SinkEvent::ConnectionState { old, new, peer } => {
                self.on_connection_state(old, new, peer);
                Flow::Continue
            }
            SinkEvent::AudioState(state) => {
                tracing::info!(old = ?self.audio, new = ?state, "audio state changed");
                self.audio = state;
                if state == AudioState::Started {
                    self.data_path.reset_packets();
                }
                Flow::Continue
            }
            SinkEvent::CodecConfigured { codec, octets } => {
                self.on_codec_configured(codec, &octets);
                Flow::Continue
            }
            SinkEvent::ProfileInitialized { success } => {
                self.on_profile_initialized(success);
                Flow::Continue
            }
            SinkEvent::AudioPayload(payload) => {
                self.data_path.deliver(&payload);
                Flow::Continue
            }
            SinkEvent::DelayReportSupport { supported } => {
                tracing::info!(supported, "peer delay reporting support");
                Flow::Continue
            }
            SinkEvent::DelayValueReported { value } => {
                let delay = value.saturating_add(self.cfg.delay_offset);
                tracing::info!(reported = value, delay, "setting sink delay (1/10 ms)");
                self.send(Directive::SetDelayValue(delay));
                Flow::Continue
            }
            SinkEvent::DelayValueSet { success, value } => {
                if success {
                    tracing::info!(value, "sink delay set (1/10 ms)");
                } else {
                    tracing::warn!(value, "sink delay rejected");
                }
                Flow::Continue
            }
            SinkEvent::Remote(event) => {
                self.remote.handle(event);
                Flow::Continue
            }
            SinkEvent::OutputFailed { generation, error } => {
                let live = self.pipeline.as_ref().map(Pipeline::generation);
                if live == Some(generation) {
                    tracing::error!(generation, %error, "output failed; stopping pipeline");
                    self.stop_pipeline();
                } else {
                    tracing::debug!(generation, "ignoring failure of a stopped pipeline");
                }
                Flow::Continue
            }
            SinkEvent::Shutdown => {
                tracing::info!("session shutting down");
                self.stop_pipeline();
                Flow::Stop
            }
        };
        self.published.publish(self.snapshot());
        flow
    }

    fn on_connection_state(&mut self, old: ConnectionState, new: ConnectionState, peer: PeerAddress) {
        tracing::info!(?old, ?new, %peer, "connection state changed");
        self.connection = new;
        match new {
            ConnectionState::Connecting => {
                self.status.update(UiStatus::Connecting);
                self.prepare_sink();
            }
            ConnectionState::Connected => {
                self.peer = Some(peer);
                self.audio = AudioState::Stopped;
                self.status.update(UiStatus::Connected);
                self.send(Directive::SetScanMode {
                    connectable: false,
                    discoverable: false,
                });
                self.start_pipeline();
                self.store.update_last_peer(peer);
            }
            ConnectionState::Disconnected => {
                self.peer = None;
                self.status.update(UiStatus::NotConnected);
                self.send(Directive::SetScanMode {
                    connectable: true,
                    discoverable: true,
                });
                self.stop_pipeline();
                self.remote.clear_capabilities();
            }
            ConnectionState::Disconnecting => {}
        }
    }

    fn on_codec_configured(&mut self, codec: CodecKind, octets: &[u8]) {
        let Some(format) = sink_format_for(codec, octets) else {
            tracing::warn!(?codec, codec_type = codec.raw(), "unsupported codec; sink not reconfigured");
            return;
        };
        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            "codec configured"
        );
        match self.sink.configure(format) {
            Ok(()) => self.format = Some(format),
            Err(e) => tracing::warn!("sink configure failed: {e:#}"),
        }
    }

    fn on_profile_initialized(&mut self, success: bool) {
        if !success {
            tracing::info!("audio profile deinitialized");
            return;
        }
        tracing::info!("audio profile initialized");
        self.send(Directive::GetDelayValue);
        self.send(Directive::SetScanMode {
            connectable: true,
            discoverable: true,
        });
        match self.store.read_last_peer() {
            Some(peer) => {
                tracing::info!(%peer, "reconnecting to last peer");
                self.send(Directive::Connect(peer));
            }
            None => tracing::info!("no stored peer; waiting for a connection"),
        }
    }

    /// Enable the sink ahead of the first audio burst.
    fn prepare_sink(&mut self) {
        if self.sink_enabled {
            return;
        }
        match self.sink.enable() {
            Ok(()) => self.sink_enabled = true,
            Err(e) => tracing::warn!("sink enable failed: {e:#}"),
        }
    }

    fn start_pipeline(&mut self) {
        if self.pipeline.is_some() {
            tracing::warn!("pipeline already running");
            return;
        }
        self.prepare_sink();
        self.generation += 1;
        match Pipeline::start(&self.cfg, self.sink.clone(), self.failures.clone(), self.generation) {
            Ok(pipeline) => {
                self.data_path.attach(pipeline.buffer().clone());
                self.pipeline = Some(pipeline);
            }
            Err(e) => tracing::error!("cannot start streaming pipeline: {e:#}"),
        }
    }

    fn stop_pipeline(&mut self) {
        self.data_path.detach();
        match self.pipeline.take() {
            Some(pipeline) => pipeline.shutdown(self.sink.as_ref()),
            None if self.sink_enabled => {
                if let Err(e) = self.sink.disable() {
                    tracing::warn!("sink disable failed: {e:#}");
                }
            }
            None => {}
        }
        self.sink_enabled = false;
    }

    fn send(&self, directive: Directive) {
        send_directive(self.transport.as_ref(), directive);
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let buffer = self.pipeline.as_ref().map(|p| p.buffer());
        SessionSnapshot {
            connection: self.connection,
            audio: self.audio,
            peer: self.peer,
            format: self.format,
            buffer_mode: buffer.map(|b| b.mode()),
            buffered_bytes: buffer.map(|b| b.len()),
            packets: self.data_path.packets(),
            volume: self.remote.volume(),
        }
    }
}

/// Handle to a running session worker.
pub struct SessionHandle {
    events: EventSender,
    data_path: DataPath,
    status: SessionStatus,
    volume: VolumeControl,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Queue for transport events.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Payload delivery path for the transport's audio callback.
    pub fn data_path(&self) -> DataPath {
        self.data_path.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.clone()
    }

    /// Local volume control (hardware knob).
    pub fn volume(&self) -> VolumeControl {
        self.volume.clone()
    }

    /// Stop the worker, tearing down any live pipeline, and return the final snapshot.
    pub fn shutdown(mut self) -> SessionSnapshot {
        self.stop();
        self.status.snapshot()
    }

    fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.events.send_wait(SinkEvent::Shutdown);
        if join.join().is_err() {
            tracing::error!("session worker panicked");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the session worker.
pub fn spawn_session_worker(cfg: PipelineConfig, deps: SessionDeps) -> Result<SessionHandle> {
    cfg.validate()?;
    let (events, rx) = event_channel(&cfg);
    let (failures_tx, failures) = crossbeam_channel::unbounded();
    let data_path = DataPath::new(cfg.packet_log_interval);
    let status = SessionStatus::new();
    let session = Session::new(cfg, deps, failures_tx, data_path.clone(), status.clone());
    let volume = session.remote.volume_control();
    status.publish(session.snapshot());

    let join = thread::Builder::new()
        .name("session-worker".to_string())
        .spawn(move || run_session(session, rx, failures))
        .context("spawn session worker thread")?;

    Ok(SessionHandle {
        events,
        data_path,
        status,
        volume,
        join: Some(join),
    })
}

fn run_session(mut session: Session, rx: Receiver<SinkEvent>, failures: Receiver<OutputFailure>) {
    tracing::debug!("session worker started");
    while let Some(event) = next_event(&rx, &failures) {
        if session.handle(event) == Flow::Stop {
            break;
        }
    }
    tracing::debug!("session worker exited");
}

/// Next transport event or writer failure. Failures bypass the bounded event queue,
/// so a full queue cannot hide a dead writer.
fn next_event(rx: &Receiver<SinkEvent>, failures: &Receiver<OutputFailure>) -> Option<SinkEvent> {
    crossbeam_channel::select! {
        recv(failures) -> failure => failure.ok().map(SinkEvent::from),
        recv(rx) -> event => event.ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryPeerStore, RecordingSink, RecordingTransport, SinkCall, wait_until};
    use a2dp_sink_types::BufferMode;
    use std::time::{Duration, Instant};

    const PEER: PeerAddress = PeerAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn cfg() -> PipelineConfig {
        PipelineConfig {
            capacity_bytes: 256,
            low_watermark_bytes: 128,
            high_watermark_bytes: 128,
            drain_chunk_bytes: 32,
            drain_timeout: Duration::from_millis(5),
            ..PipelineConfig::default()
        }
    }

    struct Harness {
        session: Session,
        sink: Arc<RecordingSink>,
        transport: Arc<RecordingTransport>,
        failures: Receiver<OutputFailure>,
        ui: Receiver<UiStatus>,
    }

    fn harness(store: MemoryPeerStore) -> Harness {
        let sink = Arc::new(RecordingSink::new());
        let transport = Arc::new(RecordingTransport::new());
        let (status, ui) = StatusIndicator::channel();
        let (tx, failures) = crossbeam_channel::unbounded();
        let deps = SessionDeps {
            sink: sink.clone(),
            transport: transport.clone(),
            store: DeviceIdentityStore::new(Box::new(store)),
            status,
            volume: Arc::new(VolumeState::default()),
        };
        let session = Session::new(
            cfg(),
            deps,
            tx,
            DataPath::new(cfg().packet_log_interval),
            SessionStatus::new(),
        );
        Harness {
            session,
            sink,
            transport,
            failures,
            ui,
        }
    }

    fn connection(new: ConnectionState) -> SinkEvent {
        SinkEvent::ConnectionState {
            old: ConnectionState::Disconnected,
            new,
            peer: PEER,
        }
    }

    #[test]
    fn connect_with_empty_store_starts_pipeline_and_stores_peer() {
        let store = MemoryPeerStore::new();
        let writes = store.write_counter();
        let mut h = harness(store);

        h.session.handle(connection(ConnectionState::Connected));

        let snap = h.session.snapshot();
        assert_eq!(snap.connection, ConnectionState::Connected);
        assert_eq!(snap.peer, Some(PEER));
        assert!(snap.buffer_mode.is_some());
        assert_eq!(h.session.store.read_last_peer(), Some(PEER));
        assert_eq!(writes.load(Ordering::Relaxed), 1);
        assert_eq!(h.ui.try_recv(), Ok(UiStatus::Connected));
        assert_eq!(
            h.transport.sent(),
            vec![Directive::SetScanMode {
                connectable: false,
                discoverable: false
            }]
        );
        assert!(h.sink.is_enabled());

        h.session.handle(SinkEvent::Shutdown);
    }

    #[test]
    fn reconnect_to_same_peer_does_not_rewrite_store() {
        let store = MemoryPeerStore::with_blob(PEER.as_bytes().to_vec());
        let writes = store.write_counter();
        let mut h = harness(store);

        h.session.handle(connection(ConnectionState::Connected));
        assert_eq!(writes.load(Ordering::Relaxed), 0);
        h.session.handle(SinkEvent::Shutdown);
    }

    #[test]
    fn connecting_enables_sink_once() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(connection(ConnectionState::Connecting));
        assert_eq!(h.sink.calls(), vec![SinkCall::Enable]);
        assert_eq!(h.ui.try_recv(), Ok(UiStatus::Connecting));

        h.session.handle(connection(ConnectionState::Connected));
        assert_eq!(h.sink.calls(), vec![SinkCall::Enable]);
        h.session.handle(SinkEvent::Shutdown);
    }

    #[test]
    fn payloads_reach_the_sink() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(connection(ConnectionState::Connected));

        let data_path = h.session.data_path.clone();
        assert_eq!(data_path.deliver(&[5u8; 128]), 128);
        assert!(wait_until(|| h.sink.written().len() == 128));
        assert_eq!(data_path.packets(), 1);
        assert_eq!(data_path.buffered(), Some(0));
        h.session.handle(SinkEvent::Shutdown);
        assert_eq!(data_path.buffered(), None);
    }

    #[test]
    fn disconnect_while_writer_blocked_in_drain() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(connection(ConnectionState::Connected));
        assert!(wait_until(|| {
            h.session.snapshot().buffer_mode == Some(BufferMode::Prefetching)
        }));

        let start = Instant::now();
        h.session.handle(connection(ConnectionState::Disconnected));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!h.sink.is_enabled());
        assert_eq!(h.sink.calls().last(), Some(&SinkCall::Disable));
        assert_eq!(h.session.snapshot().buffer_mode, None);
        assert_eq!(h.session.data_path.deliver(&[1u8; 16]), 0);
    }

    #[test]
    fn disconnect_while_writer_blocked_in_write() {
        let mut h = harness(MemoryPeerStore::new());
        h.sink.set_blocking(true);
        h.session.handle(connection(ConnectionState::Connected));
        h.session.data_path.deliver(&[1u8; 128]);
        assert!(wait_until(|| h.sink.blocked_writers() == 1));

        h.session.handle(connection(ConnectionState::Disconnected));
        assert!(!h.sink.is_enabled());
        assert_eq!(h.sink.blocked_writers(), 0);
        // Teardown-induced write errors are not failures.
        assert!(h.failures.try_recv().is_err());
        assert!(
            h.transport.sent().contains(&Directive::SetScanMode {
                connectable: true,
                discoverable: true
            })
        );
    }

    #[test]
    fn codec_reconfigure_keeps_buffered_bytes() {
        let mut h = harness(MemoryPeerStore::new());
        h.sink.set_blocking(true);
        h.session.handle(connection(ConnectionState::Connected));
        h.session.data_path.deliver(&[1u8; 128]);
        assert!(wait_until(|| h.sink.blocked_writers() == 1));

        let before = h.session.snapshot().buffered_bytes;
        assert!(before.is_some_and(|n| n > 0));
        h.session.handle(SinkEvent::CodecConfigured {
            codec: CodecKind::Sbc,
            octets: vec![0x10, 0x15, 2, 53],
        });
        let expected = SinkFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        assert!(h.sink.calls().contains(&SinkCall::Configure(expected)));
        assert_eq!(h.session.snapshot().format, Some(expected));
        assert_eq!(h.session.snapshot().buffered_bytes, before);

        h.session.handle(SinkEvent::Shutdown);
    }

    #[test]
    fn unsupported_and_unexpected_events_are_ignored() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(SinkEvent::CodecConfigured {
            codec: CodecKind::Mpeg24,
            octets: vec![0x80, 0, 0, 0],
        });
        h.session.handle(SinkEvent::CodecConfigured {
            codec: CodecKind::Sbc,
            octets: vec![],
        });
        h.session.handle(SinkEvent::AudioPayload(vec![0u8; 64]));
        h.session.handle(SinkEvent::OutputFailed {
            generation: 42,
            error: "stale".to_string(),
        });
        h.session.handle(SinkEvent::ProfileInitialized { success: false });
        h.session.handle(connection(ConnectionState::Disconnecting));
        h.session.handle(SinkEvent::Remote(
            crate::remote::RemoteEvent::PlayStatusResponse,
        ));
        h.session.handle(connection(ConnectionState::Disconnected));

        assert!(
            !h.sink
                .calls()
                .iter()
                .any(|c| matches!(c, SinkCall::Configure(_)))
        );
        assert_eq!(h.session.snapshot().connection, ConnectionState::Disconnected);
        assert_eq!(h.session.snapshot().format, None);
    }

    #[test]
    fn profile_init_reconnects_to_stored_peer() {
        let mut h = harness(MemoryPeerStore::with_blob(PEER.as_bytes().to_vec()));
        h.session.handle(SinkEvent::ProfileInitialized { success: true });
        assert_eq!(
            h.transport.sent(),
            vec![
                Directive::GetDelayValue,
                Directive::SetScanMode {
                    connectable: true,
                    discoverable: true
                },
                Directive::Connect(PEER),
            ]
        );
    }

    #[test]
    fn profile_init_without_stored_peer_only_advertises() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(SinkEvent::ProfileInitialized { success: true });
        assert!(
            !h.transport
                .sent()
                .iter()
                .any(|d| matches!(d, Directive::Connect(_)))
        );
    }

    #[test]
    fn reported_delay_is_answered_with_offset() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(SinkEvent::DelayValueReported { value: 100 });
        assert_eq!(h.transport.sent(), vec![Directive::SetDelayValue(150)]);
    }

    #[test]
    fn audio_start_resets_packet_counter() {
        let mut h = harness(MemoryPeerStore::new());
        for _ in 0..3 {
            h.session.handle(SinkEvent::AudioPayload(vec![0u8; 4]));
        }
        assert_eq!(h.session.snapshot().packets, 3);
        h.session.handle(SinkEvent::AudioState(AudioState::Started));
        assert_eq!(h.session.snapshot().packets, 0);
        assert_eq!(h.session.snapshot().audio, AudioState::Started);
    }

    #[test]
    fn output_failure_tears_down_pipeline() {
        let mut h = harness(MemoryPeerStore::new());
        h.sink.set_failing(true);
        h.session.handle(connection(ConnectionState::Connected));
        h.session.data_path.deliver(&[1u8; 128]);

        let failure = h.failures.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(failure.generation, 1);
        h.session.handle(failure.into());

        assert_eq!(h.session.snapshot().buffer_mode, None);
        assert!(!h.sink.is_enabled());
        // Still connected; only the output path is gone.
        assert_eq!(h.session.snapshot().connection, ConnectionState::Connected);
    }

    #[test]
    fn output_failure_reaches_worker_past_a_full_event_queue() {
        let mut h = harness(MemoryPeerStore::new());
        let tight = PipelineConfig {
            event_queue_depth: 1,
            event_send_timeout: Duration::from_millis(1),
            ..cfg()
        };
        let (events, rx) = event_channel(&tight);
        assert!(events.send(SinkEvent::AudioState(AudioState::Started)));
        assert!(!events.send(SinkEvent::AudioState(AudioState::Stopped)));

        h.sink.set_failing(true);
        h.session.handle(connection(ConnectionState::Connected));
        h.session.data_path.deliver(&[1u8; 128]);

        let mut seen = Vec::new();
        while h.session.pipeline.is_some() && seen.len() < 2 {
            let event = next_event(&rx, &h.failures).unwrap();
            seen.push(format!("{event:?}"));
            h.session.handle(event);
        }
        assert!(seen.iter().any(|e| e.starts_with("OutputFailed")), "{seen:?}");
        assert!(!h.sink.is_enabled());
        assert_eq!(h.session.snapshot().buffer_mode, None);
    }

    #[test]
    fn stale_output_failure_is_ignored() {
        let mut h = harness(MemoryPeerStore::new());
        h.session.handle(connection(ConnectionState::Connected));
        h.session.handle(SinkEvent::OutputFailed {
            generation: 99,
            error: "old".to_string(),
        });
        assert!(h.session.snapshot().buffer_mode.is_some());
        h.session.handle(SinkEvent::Shutdown);
    }

    #[test]
    fn worker_publishes_snapshots_and_shuts_down() {
        let sink = Arc::new(RecordingSink::new());
        let transport = Arc::new(RecordingTransport::new());
        let handle = spawn_session_worker(
            cfg(),
            SessionDeps {
                sink: sink.clone(),
                transport: transport.clone(),
                store: DeviceIdentityStore::new(Box::new(MemoryPeerStore::new())),
                status: StatusIndicator::disabled(),
                volume: Arc::new(VolumeState::new(40)),
            },
        )
        .unwrap();

        let events = handle.events();
        assert!(events.send(connection(ConnectionState::Connected)));
        let status = handle.status();
        assert!(wait_until(|| status.snapshot().connection == ConnectionState::Connected));
        assert_eq!(status.snapshot().volume, 40);

        handle.volume().set_local(50);
        let snap = handle.shutdown();
        assert_eq!(snap.buffer_mode, None);
        assert_eq!(snap.volume, 50);
        assert!(!sink.is_enabled());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = PipelineConfig {
            high_watermark_bytes: 1 << 20,
            ..PipelineConfig::default()
        };
        let deps = SessionDeps {
            sink: Arc::new(RecordingSink::new()),
            transport: Arc::new(RecordingTransport::new()),
            store: DeviceIdentityStore::new(Box::new(MemoryPeerStore::new())),
            status: StatusIndicator::disabled(),
            volume: Arc::new(VolumeState::default()),
        };
        assert!(spawn_session_worker(bad, deps).is_err());
    }
}
