//! Remote-control channel: notification subscriptions on the controller side and
//! volume/play-status notification responses on the target side.
//!
//! Every change notification is single-shot, so each one received is followed by
//! a fresh subscription for the same kind.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use a2dp_sink_types::{PeerAddress, UiStatus};

use crate::event::{Directive, Transport, send_directive};
use crate::status::StatusIndicator;

/// Highest absolute volume value on the remote-control scale.
pub const MAX_VOLUME: u8 = 0x7f;

/// Change-notification event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    PlayStatusChange,
    TrackChange,
    TrackReachedEnd,
    TrackReachedStart,
    PlayPosChanged,
    BatteryStatusChange,
    SystemStatusChange,
    AppSettingsChange,
    NowPlayingChange,
    AvailablePlayersChange,
    AddressedPlayerChange,
    UidsChange,
    VolumeChange,
}

impl NotificationKind {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x01 => Self::PlayStatusChange,
            0x02 => Self::TrackChange,
            0x03 => Self::TrackReachedEnd,
            0x04 => Self::TrackReachedStart,
            0x05 => Self::PlayPosChanged,
            0x06 => Self::BatteryStatusChange,
            0x07 => Self::SystemStatusChange,
            0x08 => Self::AppSettingsChange,
            0x09 => Self::NowPlayingChange,
            0x0a => Self::AvailablePlayersChange,
            0x0b => Self::AddressedPlayerChange,
            0x0c => Self::UidsChange,
            0x0d => Self::VolumeChange,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        match self {
            Self::PlayStatusChange => 0x01,
            Self::TrackChange => 0x02,
            Self::TrackReachedEnd => 0x03,
            Self::TrackReachedStart => 0x04,
            Self::PlayPosChanged => 0x05,
            Self::BatteryStatusChange => 0x06,
            Self::SystemStatusChange => 0x07,
            Self::AppSettingsChange => 0x08,
            Self::NowPlayingChange => 0x09,
            Self::AvailablePlayersChange => 0x0a,
            Self::AddressedPlayerChange => 0x0b,
            Self::UidsChange => 0x0c,
            Self::VolumeChange => 0x0d,
        }
    }
}

/// Set of notification kinds a peer controller supports (bit `n` = event id `n`).
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationCaps(u16);

impl NotificationCaps {
    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn supports(self, kind: NotificationKind) -> bool {
        self.0 & (1 << kind.id()) != 0
    }

    pub fn insert(&mut self, kind: NotificationKind) {
        self.0 |= 1 << kind.id();
    }

    pub fn with(mut self, kind: NotificationKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn track_change(self) -> bool {
        self.supports(NotificationKind::TrackChange)
    }

    pub fn play_status_change(self) -> bool {
        self.supports(NotificationKind::PlayStatusChange)
    }

    pub fn play_pos_changed(self) -> bool {
        self.supports(NotificationKind::PlayPosChanged)
    }
}

impl fmt::Debug for NotificationCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationCaps({:#06x})", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayStatus {
    Stopped,
    #[default]
    Playing,
    Paused,
    FwdSeek,
    RevSeek,
    Error,
}

/// Track metadata attributes requested from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataMask(u8);

impl MetadataMask {
    pub const TITLE: Self = Self(0x01);
    pub const ARTIST: Self = Self(0x02);
    pub const ALBUM: Self = Self(0x04);
    pub const TRACK_NUM: Self = Self(0x08);
    pub const NUM_TRACKS: Self = Self(0x10);
    pub const GENRE: Self = Self(0x20);
    pub const PLAYING_TIME: Self = Self(0x40);

    /// Title, artist, album and genre.
    pub const fn track_info() -> Self {
        Self(Self::TITLE.0 | Self::ARTIST.0 | Self::ALBUM.0 | Self::GENRE.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassthroughKey {
    Play,
    Stop,
    Pause,
    Forward,
    Backward,
}

impl PassthroughKey {
    pub fn code(self) -> u8 {
        match self {
            Self::Play => 0x44,
            Self::Stop => 0x45,
            Self::Pause => 0x46,
            Self::Forward => 0x4b,
            Self::Backward => 0x4c,
        }
    }
}

/// A change notification received from the peer's target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    TrackChanged,
    PlayStatus(PlayStatus),
    PlayPosition { ms: u32 },
    Other { event_id: u8 },
}

/// Remote-control channel traffic reported by the transport stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    // Controller role: we control the peer's player.
    ControllerConnection { connected: bool, peer: PeerAddress },
    PassthroughResponse { key: u8, pressed: bool, code: u8 },
    Metadata { attr_id: u8, text: String },
    Notification(Notification),
    RemoteFeatures { features: u32, target_flags: u16 },
    Capabilities(NotificationCaps),
    PlayStatusResponse,
    // Target role: the peer controls us.
    TargetConnection { connected: bool, peer: PeerAddress },
    PassthroughCommand { key: u8, pressed: bool },
    SetAbsoluteVolume(u8),
    RegisterNotification { event_id: u8, param: u32 },
    TargetRemoteFeatures { features: u32, controller_flags: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Interim,
    Changed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyValue {
    Volume(u8),
    PlayStatus(PlayStatus),
}

/// Remote-control requests sent to the transport stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteCommand {
    GetCapabilities,
    RegisterNotification {
        kind: NotificationKind,
        interval: u32,
    },
    RequestMetadata(MetadataMask),
    Passthrough {
        key: PassthroughKey,
        pressed: bool,
    },
    NotifyResponse {
        kind: NotificationKind,
        response: ResponseKind,
        value: NotifyValue,
    },
}

fn send_remote(transport: &dyn Transport, command: RemoteCommand) -> bool {
    send_directive(transport, Directive::Remote(command))
}

#[derive(Debug)]
struct VolumeInner {
    level: u8,
    notify: bool,
}

/// Current absolute volume plus the peer's pending volume-change registration.
#[derive(Debug)]
pub struct VolumeState {
    inner: Mutex<VolumeInner>,
}

impl VolumeState {
    pub fn new(level: u8) -> Self {
        Self {
            inner: Mutex::new(VolumeInner {
                level: level.min(MAX_VOLUME),
                notify: false,
            }),
        }
    }

    pub fn level(&self) -> u8 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .level
    }
}

impl Default for VolumeState {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Writer handle for [`VolumeState`].
///
/// Notification responses are sent while the volume lock is held, so an INTERIM
/// response can never overtake the CHANGED response for a later value.
#[derive(Clone)]
pub struct VolumeControl {
    state: Arc<VolumeState>,
    transport: Arc<dyn Transport>,
}

impl VolumeControl {
    pub fn new(state: Arc<VolumeState>, transport: Arc<dyn Transport>) -> Self {
        Self { state, transport }
    }

    pub fn level(&self) -> u8 {
        self.state.level()
    }

    /// Volume changed locally; a registered peer is told once.
    pub fn set_local(&self, level: u8) {
        let level = level.min(MAX_VOLUME);
        let mut g = self.state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        g.level = level;
        tracing::info!(volume = level, percent = percent(level), "local volume set");
        if g.notify {
            g.notify = false;
            send_remote(
                self.transport.as_ref(),
                RemoteCommand::NotifyResponse {
                    kind: NotificationKind::VolumeChange,
                    response: ResponseKind::Changed,
                    value: NotifyValue::Volume(level),
                },
            );
        }
    }

    /// Volume set by the peer; it already knows the value, so nothing is sent back.
    fn set_remote(&self, level: u8) {
        let level = level.min(MAX_VOLUME);
        self.state
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .level = level;
        tracing::info!(volume = level, percent = percent(level), "volume set by remote controller");
    }

    fn register(&self) {
        let mut g = self.state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        g.notify = true;
        tracing::debug!(volume = g.level, "volume change registered");
        send_remote(
            self.transport.as_ref(),
            RemoteCommand::NotifyResponse {
                kind: NotificationKind::VolumeChange,
                response: ResponseKind::Interim,
                value: NotifyValue::Volume(g.level),
            },
        );
    }

    /// Drop a pending volume-change registration; `true` if one was pending.
    fn unregister(&self) -> bool {
        let mut g = self.state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut g.notify, false)
    }
}

fn percent(level: u8) -> u32 {
    u32::from(level) * 100 / u32::from(MAX_VOLUME)
}

/// Remote-control state owned by the session worker.
pub struct RemoteControl {
    caps: NotificationCaps,
    play_status: PlayStatus,
    play_notify: bool,
    position_interval: u32,
    transport: Arc<dyn Transport>,
    status: StatusIndicator,
    volume: VolumeControl,
}

impl RemoteControl {
    pub fn new(
        transport: Arc<dyn Transport>,
        status: StatusIndicator,
        volume: Arc<VolumeState>,
        position_interval: u32,
    ) -> Self {
        let volume = VolumeControl::new(volume, transport.clone());
        Self {
            caps: NotificationCaps::default(),
            play_status: PlayStatus::default(),
            play_notify: false,
            position_interval,
            transport,
            status,
            volume,
        }
    }

    pub fn play_status(&self) -> PlayStatus {
        self.play_status
    }

    pub fn volume(&self) -> u8 {
        self.volume.level()
    }

    pub fn volume_control(&self) -> VolumeControl {
        self.volume.clone()
    }

    pub fn set_local_volume(&self, level: u8) {
        self.volume.set_local(level);
    }

    /// Forget the peer's capabilities and registrations (link gone).
    pub fn clear_capabilities(&mut self) {
        self.caps = NotificationCaps::default();
        self.play_notify = false;
        if self.volume.unregister() {
            tracing::debug!("pending volume registration dropped");
        }
    }

    pub fn handle(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::ControllerConnection { connected, peer } => {
                tracing::info!(connected, %peer, "remote control (controller) connection");
                if connected {
                    self.send(RemoteCommand::GetCapabilities);
                    self.press(PassthroughKey::Play);
                } else {
                    self.clear_capabilities();
                }
            }
            RemoteEvent::Capabilities(caps) => {
                tracing::info!(?caps, "peer notification capabilities");
                self.caps = caps;
                self.new_track();
                self.subscribe_play_status();
                self.subscribe_play_position();
            }
            RemoteEvent::Notification(notification) => self.on_notification(notification),
            RemoteEvent::Metadata { attr_id, text } => {
                tracing::info!(attr_id, %text, "track metadata");
            }
            RemoteEvent::PassthroughResponse { key, pressed, code } => {
                tracing::debug!(key, pressed, code, "passthrough response");
            }
            RemoteEvent::RemoteFeatures {
                features,
                target_flags,
            } => {
                tracing::info!(
                    features = %format!("{features:#x}"),
                    target_flags = %format!("{target_flags:#x}"),
                    "remote target features"
                );
            }
            RemoteEvent::PlayStatusResponse => {
                tracing::debug!("play status response");
            }
            RemoteEvent::TargetConnection { connected, peer } => {
                tracing::info!(connected, %peer, "remote control (target) connection");
                if !connected {
                    self.play_notify = false;
                    self.volume.unregister();
                }
            }
            RemoteEvent::PassthroughCommand { key, pressed } => {
                tracing::info!(key, pressed, "passthrough command from peer");
            }
            RemoteEvent::SetAbsoluteVolume(level) => self.volume.set_remote(level),
            RemoteEvent::RegisterNotification { event_id, param } => {
                tracing::info!(event_id, param, "peer registered for notification");
                match NotificationKind::from_id(event_id) {
                    Some(NotificationKind::VolumeChange) => self.volume.register(),
                    Some(NotificationKind::PlayStatusChange) => {
                        self.play_notify = true;
                        self.send(RemoteCommand::NotifyResponse {
                            kind: NotificationKind::PlayStatusChange,
                            response: ResponseKind::Interim,
                            value: NotifyValue::PlayStatus(self.play_status),
                        });
                    }
                    _ => tracing::debug!(event_id, "notification kind not served"),
                }
            }
            RemoteEvent::TargetRemoteFeatures {
                features,
                controller_flags,
            } => {
                tracing::info!(
                    features = %format!("{features:#x}"),
                    controller_flags = %format!("{controller_flags:#x}"),
                    "remote controller features"
                );
            }
        }
    }

    fn on_notification(&mut self, notification: Notification) {
        match notification {
            Notification::TrackChanged => self.new_track(),
            Notification::PlayStatus(status) => {
                tracing::info!(?status, "playback status changed");
                self.subscribe_play_status();
                match status {
                    PlayStatus::Paused => self.status.update(UiStatus::Paused),
                    PlayStatus::Playing => self.status.update(UiStatus::Connected),
                    _ => {}
                }
                if status != self.play_status {
                    self.play_status = status;
                    if self.play_notify {
                        self.play_notify = false;
                        self.send(RemoteCommand::NotifyResponse {
                            kind: NotificationKind::PlayStatusChange,
                            response: ResponseKind::Changed,
                            value: NotifyValue::PlayStatus(status),
                        });
                    }
                }
            }
            Notification::PlayPosition { ms } => {
                tracing::debug!(ms, "play position changed");
                self.subscribe_play_position();
            }
            Notification::Other { event_id } => {
                tracing::info!(event_id, "unhandled notification");
            }
        }
    }

    fn new_track(&self) {
        self.send(RemoteCommand::RequestMetadata(MetadataMask::track_info()));
        if self.caps.track_change() {
            self.subscribe(NotificationKind::TrackChange, 0);
        }
    }

    fn subscribe_play_status(&self) {
        if self.caps.play_status_change() {
            self.subscribe(NotificationKind::PlayStatusChange, 0);
        }
    }

    fn subscribe_play_position(&self) {
        if self.caps.play_pos_changed() {
            self.subscribe(NotificationKind::PlayPosChanged, self.position_interval);
        }
    }

    fn subscribe(&self, kind: NotificationKind, interval: u32) {
        self.send(RemoteCommand::RegisterNotification { kind, interval });
    }

    fn press(&self, key: PassthroughKey) {
        self.send(RemoteCommand::Passthrough { key, pressed: true });
        self.send(RemoteCommand::Passthrough {
            key,
            pressed: false,
        });
    }

    fn send(&self, command: RemoteCommand) {
        send_remote(self.transport.as_ref(), command);
    }
}
