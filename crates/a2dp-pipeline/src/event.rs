//! Events from the transport stack, directives back to it, and the bounded queue
//! that serializes event handling.

use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use a2dp_sink_types::{AudioState, ConnectionState, PeerAddress};

use crate::codec::CodecKind;
use crate::config::PipelineConfig;
use crate::remote::{RemoteCommand, RemoteEvent};

/// Everything the session worker reacts to.
#[derive(Clone, Debug)]
pub enum SinkEvent {
    /// Audio link connection state changed.
    ConnectionState {
        old: ConnectionState,
        new: ConnectionState,
        peer: PeerAddress,
    },
    /// Audio datapath state changed.
    AudioState(AudioState),
    /// The peer (re)negotiated codec parameters.
    CodecConfigured { codec: CodecKind, octets: Vec<u8> },
    /// Audio profile init (`true`) or deinit (`false`) completed.
    ProfileInitialized { success: bool },
    /// Decoded PCM delivered through the event queue instead of the direct data path.
    AudioPayload(Vec<u8>),
    /// Whether the peer supports delay reporting.
    DelayReportSupport { supported: bool },
    /// The stack's own delay value, in 1/10 ms.
    DelayValueReported { value: u16 },
    /// Outcome of a `SetDelayValue` directive.
    DelayValueSet { success: bool, value: u16 },
    /// Remote-control channel traffic.
    Remote(RemoteEvent),
    /// The writer of pipeline `generation` could not write to the sink.
    OutputFailed { generation: u64, error: String },
    /// Tear everything down and stop the worker.
    Shutdown,
}

/// Requests the core issues to the transport stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    Connect(PeerAddress),
    SetScanMode { connectable: bool, discoverable: bool },
    GetDelayValue,
    /// Delay in 1/10 ms.
    SetDelayValue(u16),
    Remote(RemoteCommand),
}

/// The radio/transport collaborator as seen by the core.
pub trait Transport: Send + Sync {
    fn send(&self, directive: Directive) -> Result<()>;
}

/// Issue a directive, logging (not propagating) a rejection.
pub(crate) fn send_directive(transport: &dyn Transport, directive: Directive) -> bool {
    let label = format!("{directive:?}");
    match transport.send(directive) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(directive = %label, "transport rejected directive: {e:#}");
            false
        }
    }
}

/// Producer side of the session event queue.
///
/// Waits at most `timeout` on a full queue, then drops the event.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<SinkEvent>,
    timeout: Duration,
}

impl EventSender {
    /// Returns `false` if the event was dropped.
    pub fn send(&self, event: SinkEvent) -> bool {
        match self.tx.send_timeout(event, self.timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(ev)) => {
                tracing::warn!(event = ?ev, "session event queue full; event dropped");
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                tracing::debug!("session worker gone; event dropped");
                false
            }
        }
    }

    /// Enqueue without a timeout; for control events that must not be lost.
    pub(crate) fn send_wait(&self, event: SinkEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Create the bounded queue feeding the session worker.
pub fn event_channel(cfg: &PipelineConfig) -> (EventSender, Receiver<SinkEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(cfg.event_queue_depth);
    (
        EventSender {
            tx,
            timeout: cfg.event_send_timeout,
        },
        rx,
    )
}
