//! Recording doubles for the collaborator traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};

use a2dp_sink_types::{PEER_ADDRESS_LEN, SinkFormat};

use crate::event::{Directive, Transport};
use crate::identity::PeerStore;
use crate::output::OutputSink;
use crate::status::StatusLed;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SinkCall {
    Configure(SinkFormat),
    Enable,
    Disable,
}

#[derive(Default)]
struct SinkState {
    calls: Vec<SinkCall>,
    written: Vec<u8>,
    write_calls: usize,
    enabled: bool,
    failing: bool,
    blocking: bool,
    blocked_writers: usize,
    max_write: Option<usize>,
}

/// Sink that records every call and keeps the written bytes.
pub(crate) struct RecordingSink {
    state: Mutex<SinkState>,
    cv: Condvar,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.state.lock().unwrap().write_calls
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub(crate) fn blocked_writers(&self) -> usize {
        self.state.lock().unwrap().blocked_writers
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// While set, writes block until the sink is disabled.
    pub(crate) fn set_blocking(&self, blocking: bool) {
        self.state.lock().unwrap().blocking = blocking;
        self.cv.notify_all();
    }

    pub(crate) fn set_max_write(&self, max: usize) {
        self.state.lock().unwrap().max_write = Some(max);
    }
}

impl OutputSink for RecordingSink {
    fn configure(&self, format: SinkFormat) -> Result<()> {
        self.state.lock().unwrap().calls.push(SinkCall::Configure(format));
        Ok(())
    }

    fn enable(&self) -> Result<()> {
        let mut g = self.state.lock().unwrap();
        g.calls.push(SinkCall::Enable);
        g.enabled = true;
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        let mut g = self.state.lock().unwrap();
        g.calls.push(SinkCall::Disable);
        g.enabled = false;
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut g = self.state.lock().unwrap();
        g.write_calls += 1;
        if g.failing {
            bail!("simulated device failure");
        }
        if g.blocking {
            g.blocked_writers += 1;
            while g.blocking && g.enabled {
                g = self.cv.wait(g).unwrap();
            }
            g.blocked_writers -= 1;
            if !g.enabled {
                return Err(anyhow!("sink disabled"));
            }
        }
        let n = g.max_write.map(|m| m.min(data.len())).unwrap_or(data.len());
        g.written.extend_from_slice(&data[..n]);
        Ok(n)
    }
}

/// Transport that records directives; can be told to reject them.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<Directive>>,
    reject: Mutex<bool>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sent(&self) -> Vec<Directive> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn take(&self) -> Vec<Directive> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub(crate) fn set_reject(&self, reject: bool) {
        *self.reject.lock().unwrap() = reject;
    }
}

impl Transport for RecordingTransport {
    fn send(&self, directive: Directive) -> Result<()> {
        if *self.reject.lock().unwrap() {
            bail!("rejected");
        }
        self.sent.lock().unwrap().push(directive);
        Ok(())
    }
}

/// LED that records each level it is driven to.
#[derive(Clone, Default)]
pub(crate) struct RecordingLed {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl RecordingLed {
    pub(crate) fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }
}

impl StatusLed for RecordingLed {
    fn set(&mut self, on: bool) {
        self.levels.lock().unwrap().push(on);
    }
}

/// Poll `f` until it holds or five seconds pass.
pub(crate) fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// In-memory backend; counts writes so callers can observe the write policy.
#[derive(Clone, Default)]
pub(crate) struct MemoryPeerStore {
    blob: Option<Vec<u8>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryPeerStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: Some(blob),
            writes: Arc::default(),
        }
    }

    /// Shared write counter; stays valid after the store is boxed.
    pub(crate) fn write_counter(&self) -> Arc<AtomicUsize> {
        self.writes.clone()
    }
}

impl PeerStore for MemoryPeerStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.blob.clone())
    }

    fn save(&mut self, address: &[u8; PEER_ADDRESS_LEN]) -> Result<()> {
        self.blob = Some(address.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
