use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a Bluetooth device address in bytes.
pub const PEER_ADDRESS_LEN: usize = 6;

/// 6-byte hardware address of a remote device.
///
/// Serialized as the usual colon-separated hex form (`AA:BB:CC:DD:EE:FF`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub [u8; PEER_ADDRESS_LEN]);

impl PeerAddress {
    pub const fn new(bytes: [u8; PEER_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ADDRESS_LEN] {
        &self.0
    }

    /// Build an address from a raw slice; `None` unless exactly 6 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; PEER_ADDRESS_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Error returned when a textual peer address cannot be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsePeerAddressError(String);

impl fmt::Display for ParsePeerAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid peer address: {}", self.0)
    }
}

impl std::error::Error for ParsePeerAddressError {}

impl FromStr for PeerAddress {
    type Err = ParsePeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut out = [0u8; PEER_ADDRESS_LEN];
        let mut count = 0usize;
        for part in trimmed.split([':', '-']) {
            if count >= PEER_ADDRESS_LEN
                || part.len() != 2
                || !part.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(ParsePeerAddressError(trimmed.to_string()));
            }
            out[count] = u8::from_str_radix(part, 16)
                .map_err(|_| ParsePeerAddressError(trimmed.to_string()))?;
            count += 1;
        }
        if count != PEER_ADDRESS_LEN {
            return Err(ParsePeerAddressError(trimmed.to_string()));
        }
        Ok(Self(out))
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// PCM output format the sink hardware runs at.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SinkFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// 1 (mono) or 2 (stereo).
    pub channels: u16,
}

impl SinkFormat {
    /// Format the output is prepared with before any codec has been negotiated.
    pub const DEFAULT: SinkFormat = SinkFormat {
        sample_rate: 44_100,
        channels: 2,
    };

    /// Bytes per interleaved frame of 16-bit samples.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

impl Default for SinkFormat {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Connection state of the audio profile link, as reported by the stack.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Audio datapath state, meaningful only while connected.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioState {
    Suspended,
    #[default]
    Stopped,
    Started,
}

/// Coarse status surfaced on the status indicator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UiStatus {
    NotConnected,
    Connecting,
    /// Connected and (as far as we know) playing.
    Connected,
    Paused,
}

/// Admission mode of the streaming buffer.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    /// Steady state: producer appends, consumer drains.
    #[default]
    Processing,
    /// Consumer hit an underrun and waits for the buffer to refill.
    Prefetching,
    /// Producer overflowed; incoming payloads are discarded.
    Dropping,
}

/// Point-in-time view of the sink session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub audio: AudioState,
    /// Peer of the current (or most recent) connection.
    pub peer: Option<PeerAddress>,
    /// Negotiated output format, once a codec has been configured.
    pub format: Option<SinkFormat>,
    /// `None` while no pipeline exists.
    pub buffer_mode: Option<BufferMode>,
    pub buffered_bytes: Option<usize>,
    /// Audio payloads delivered since the stream last started.
    pub packets: u32,
    /// Last volume set by a controller (0..=127).
    pub volume: u8,
}
