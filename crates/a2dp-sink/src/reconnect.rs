//! Periodic reconnect to the last known peer while the link is down.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};

use a2dp_pipeline::event::{Directive, Transport};
use a2dp_pipeline::identity::DeviceIdentityStore;
use a2dp_pipeline::status::SessionStatus;
use a2dp_sink_types::ConnectionState;

pub struct Reconnector {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl Reconnector {
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.halt();
    }
}

pub fn spawn_reconnector(
    interval: Duration,
    status: SessionStatus,
    store: DeviceIdentityStore,
    transport: Arc<dyn Transport>,
) -> Result<Reconnector> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let join = thread::Builder::new()
        .name("reconnect".to_string())
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        tick(status.snapshot().connection, &store, transport.as_ref());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("spawn reconnect thread")?;
    Ok(Reconnector {
        stop_tx,
        join: Some(join),
    })
}

/// Ask the stack to connect to the stored peer; only while fully disconnected.
fn tick(connection: ConnectionState, store: &DeviceIdentityStore, transport: &dyn Transport) -> bool {
    if connection != ConnectionState::Disconnected {
        return false;
    }
    let Some(peer) = store.read_last_peer() else {
        return false;
    };
    tracing::debug!(%peer, "reconnect attempt");
    match transport.send(Directive::Connect(peer)) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("reconnect directive rejected: {e:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use a2dp_pipeline::identity::PeerStore;
    use a2dp_sink_types::{PEER_ADDRESS_LEN, PeerAddress};

    #[derive(Default)]
    struct MemoryStore(Option<Vec<u8>>);

    impl PeerStore for MemoryStore {
        fn load(&self) -> Result<Option<Vec<u8>>> {
            Ok(self.0.clone())
        }

        fn save(&mut self, address: &[u8; PEER_ADDRESS_LEN]) -> Result<()> {
            self.0 = Some(address.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Directive>>);

    impl Transport for Recorder {
        fn send(&self, directive: Directive) -> Result<()> {
            self.0.lock().unwrap().push(directive);
            Ok(())
        }
    }

    const PEER: PeerAddress = PeerAddress::new([1, 2, 3, 4, 5, 6]);

    fn stored() -> DeviceIdentityStore {
        let mut store = DeviceIdentityStore::new(Box::new(MemoryStore::default()));
        store.update_last_peer(PEER);
        store
    }

    #[test]
    fn connects_only_while_disconnected() {
        let transport = Recorder::default();
        let store = stored();
        assert!(tick(ConnectionState::Disconnected, &store, &transport));
        assert!(!tick(ConnectionState::Connecting, &store, &transport));
        assert!(!tick(ConnectionState::Connected, &store, &transport));
        assert_eq!(*transport.0.lock().unwrap(), vec![Directive::Connect(PEER)]);
    }

    #[test]
    fn nothing_stored_means_no_attempt() {
        let transport = Recorder::default();
        let store = DeviceIdentityStore::new(Box::new(MemoryStore::default()));
        assert!(!tick(ConnectionState::Disconnected, &store, &transport));
        assert!(transport.0.lock().unwrap().is_empty());
    }

    #[test]
    fn thread_ticks_and_stops() {
        let transport = Arc::new(Recorder::default());
        let reconnector = spawn_reconnector(
            Duration::from_millis(5),
            SessionStatus::new(),
            stored(),
            transport.clone(),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        reconnector.stop();
        let sent = transport.0.lock().unwrap().len();
        assert!(sent >= 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(transport.0.lock().unwrap().len(), sent);
    }
}
