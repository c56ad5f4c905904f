//! Status reporting: the UI status indicator and the shared session snapshot.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use a2dp_sink_types::{SessionSnapshot, UiStatus};

/// Steps per blink pattern.
pub const BLINK_STEPS: usize = 10;
/// Duration of one blink step; also the longest an update may wait on a full queue.
pub const BLINK_STEP: Duration = Duration::from_millis(100);
const STATUS_QUEUE_DEPTH: usize = 10;

/// A single on/off indicator.
pub trait StatusLed: Send {
    fn set(&mut self, on: bool);
}

/// On/off sequence rendered for `status`, one entry per [`BLINK_STEP`].
pub fn blink_pattern(status: UiStatus) -> [bool; BLINK_STEPS] {
    let bits: [u8; BLINK_STEPS] = match status {
        UiStatus::NotConnected => [1, 1, 1, 0, 0, 0, 0, 0, 0, 0],
        UiStatus::Connecting => [1, 1, 0, 0, 0, 1, 1, 0, 0, 0],
        UiStatus::Connected => [1, 1, 1, 1, 1, 1, 1, 1, 1, 1],
        UiStatus::Paused => [1, 1, 1, 1, 1, 1, 1, 1, 0, 0],
    };
    bits.map(|b| b == 1)
}

/// Fire-and-forget handle for publishing [`UiStatus`] changes.
#[derive(Clone)]
pub struct StatusIndicator {
    tx: Option<Sender<UiStatus>>,
}

impl StatusIndicator {
    /// Indicator that discards every update.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Indicator feeding a plain channel instead of a rendering thread.
    #[cfg(test)]
    pub(crate) fn channel() -> (Self, Receiver<UiStatus>) {
        let (tx, rx) = crossbeam_channel::bounded(STATUS_QUEUE_DEPTH);
        (Self { tx: Some(tx) }, rx)
    }

    /// Publish a status; waits at most one blink step if the indicator lags behind.
    pub fn update(&self, status: UiStatus) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send_timeout(status, BLINK_STEP).is_err() {
            tracing::debug!(?status, "status indicator busy; update dropped");
        }
    }
}

/// Spawn the thread that renders status updates on `led`.
///
/// The thread exits once every [`StatusIndicator`] clone has been dropped.
pub fn spawn_status_indicator(
    led: Box<dyn StatusLed>,
) -> Result<(StatusIndicator, JoinHandle<()>)> {
    let (tx, rx) = crossbeam_channel::bounded(STATUS_QUEUE_DEPTH);
    let join = thread::Builder::new()
        .name("status-indicator".to_string())
        .spawn(move || run_indicator(led, rx, BLINK_STEP))
        .context("spawn status indicator thread")?;
    Ok((StatusIndicator { tx: Some(tx) }, join))
}

fn run_indicator(mut led: Box<dyn StatusLed>, rx: Receiver<UiStatus>, step: Duration) {
    let mut status = UiStatus::NotConnected;
    let mut t = 0usize;
    led.set(true);
    loop {
        match rx.try_recv() {
            Ok(next) => {
                if next != status {
                    tracing::debug!(?next, "status indicator changed");
                }
                status = next;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }
        thread::sleep(step);
        led.set(blink_pattern(status)[t]);
        t = (t + 1) % BLINK_STEPS;
    }
    led.set(false);
}

/// Shared, mutex-protected [`SessionSnapshot`] published by the session worker.
#[derive(Clone, Default)]
pub struct SessionStatus {
    inner: Arc<Mutex<SessionSnapshot>>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingLed;

    #[test]
    fn patterns_match_status() {
        assert!(blink_pattern(UiStatus::Connected).iter().all(|on| *on));
        assert_eq!(
            blink_pattern(UiStatus::NotConnected)
                .iter()
                .filter(|on| **on)
                .count(),
            3
        );
        let paused = blink_pattern(UiStatus::Paused);
        assert!(paused[..8].iter().all(|on| *on));
        assert!(!paused[8] && !paused[9]);
        let connecting = blink_pattern(UiStatus::Connecting);
        assert_eq!(
            connecting,
            [true, true, false, false, false, true, true, false, false, false]
        );
    }

    #[test]
    fn disabled_indicator_ignores_updates() {
        StatusIndicator::disabled().update(UiStatus::Connected);
    }

    #[test]
    fn indicator_renders_latest_status_and_stops_when_dropped() {
        let led = RecordingLed::default();
        let (tx, rx) = crossbeam_channel::bounded(STATUS_QUEUE_DEPTH);
        let led_thread = led.clone();
        let join = thread::spawn(move || {
            run_indicator(Box::new(led_thread), rx, Duration::from_millis(1))
        });

        let indicator = StatusIndicator { tx: Some(tx) };
        indicator.update(UiStatus::Connected);
        thread::sleep(Duration::from_millis(50));
        drop(indicator);
        join.join().unwrap();

        let levels = led.levels();
        // Initial on, rendered steps, final off.
        assert!(levels.len() > 12);
        assert_eq!(levels.last(), Some(&false));
        let tail = &levels[levels.len() - 11..levels.len() - 1];
        assert!(tail.iter().all(|on| *on));
    }

    #[test]
    fn session_status_publishes_snapshots() {
        let status = SessionStatus::new();
        let mut snap = status.snapshot();
        assert_eq!(snap.packets, 0);
        snap.packets = 42;
        status.publish(snap);
        assert_eq!(status.snapshot().packets, 42);
    }
}
