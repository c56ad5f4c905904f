//! Sink runtime: wires the output device, peer store, session worker and the
//! simulated peer together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use a2dp_pipeline::identity::DeviceIdentityStore;
use a2dp_pipeline::remote::VolumeState;
use a2dp_pipeline::session::{SessionDeps, spawn_session_worker};
use a2dp_pipeline::status::spawn_status_indicator;

use crate::config::{ReplayConfig, SinkConfig};
use crate::indicator::LogLed;
use crate::output::CpalSink;
use crate::reconnect::spawn_reconnector;
use crate::replay::{ReplayPeer, replay_transport};
use crate::store::JsonPeerStore;
use crate::device;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Run the sink against a simulated peer streaming `replay.path`.
pub fn run_replay(config: SinkConfig, replay: ReplayConfig) -> Result<()> {
    let (transport, directives) = replay_transport();
    let transport = Arc::new(transport);
    let (indicator, indicator_join) = spawn_status_indicator(Box::new(LogLed::default()))?;

    let deps = SessionDeps {
        sink: Arc::new(CpalSink::new(config.output.clone())),
        transport: transport.clone(),
        store: DeviceIdentityStore::new(Box::new(JsonPeerStore::new(&config.store_path))),
        status: indicator,
        volume: Arc::new(VolumeState::new(config.initial_volume)),
    };
    let session = spawn_session_worker(config.pipeline.clone(), deps)?;

    let reconnector = match config.reconnect_interval {
        Some(interval) => Some(spawn_reconnector(
            interval,
            session.status(),
            DeviceIdentityStore::new(Box::new(JsonPeerStore::new(&config.store_path))),
            transport,
        )?),
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received; stopping");
            stop.store(true, Ordering::Relaxed);
        })
        .context("install interrupt handler")?;
    }

    let peer = ReplayPeer::new(
        replay,
        session.events(),
        session.data_path(),
        directives,
        stop,
    );
    let outcome = peer.run();

    if let Some(reconnector) = reconnector {
        reconnector.stop();
    }
    let snapshot = session.shutdown();
    match serde_json::to_string(&snapshot) {
        Ok(json) => tracing::info!(snapshot = %json, "session ended"),
        Err(e) => tracing::warn!("cannot serialize final snapshot: {e}"),
    }
    if indicator_join.join().is_err() {
        tracing::warn!("status indicator thread panicked");
    }
    outcome.map(|_| ())
}
