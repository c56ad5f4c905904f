//! Media codec identification and SBC configuration decoding.

use a2dp_sink_types::SinkFormat;

/// Media codec type carried by a codec-configuration event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecKind {
    Sbc,
    Mpeg12,
    Mpeg24,
    Atrac,
    NonA2dp,
    Unknown(u8),
}

impl CodecKind {
    /// On-air media codec type octet.
    pub fn raw(&self) -> u8 {
        match self {
            Self::Sbc => 0x00,
            Self::Mpeg12 => 0x01,
            Self::Mpeg24 => 0x02,
            Self::Atrac => 0x04,
            Self::NonA2dp => 0xff,
            Self::Unknown(raw) => *raw,
        }
    }
}

/// SBC codec information elements (4 octets).
///
/// Octet 0 carries the sampling frequency (bits 7..4) and channel mode (bits 3..0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbcConfig([u8; 4]);

const FREQ_16K: u8 = 1 << 7;
const FREQ_32K: u8 = 1 << 6;
const FREQ_44K1: u8 = 1 << 5;
const FREQ_48K: u8 = 1 << 4;
const MODE_MONO: u8 = 1 << 3;
const MODE_JOINT_STEREO: u8 = 1 << 0;

impl SbcConfig {
    /// Parse raw octets. Missing trailing octets are zero-filled; an empty slice is rejected.
    pub fn from_octets(octets: &[u8]) -> Option<Self> {
        if octets.is_empty() {
            return None;
        }
        let mut out = [0u8; 4];
        for (dst, src) in out.iter_mut().zip(octets) {
            *dst = *src;
        }
        Some(Self(out))
    }

    /// Build the configuration a source would announce for `format`.
    ///
    /// Returns `None` for rates SBC cannot carry.
    pub fn for_format(format: SinkFormat) -> Option<Self> {
        let freq = match format.sample_rate {
            16_000 => FREQ_16K,
            32_000 => FREQ_32K,
            44_100 => FREQ_44K1,
            48_000 => FREQ_48K,
            _ => return None,
        };
        let mode = match format.channels {
            1 => MODE_MONO,
            2 => MODE_JOINT_STEREO,
            _ => return None,
        };
        // 16 blocks, 8 subbands, loudness allocation; bitpool 2..=53.
        Some(Self([freq | mode, 0x15, 2, 53]))
    }

    pub fn octets(&self) -> [u8; 4] {
        self.0
    }

    pub fn is_32k(&self) -> bool {
        self.0[0] & FREQ_32K != 0
    }

    pub fn is_44k1(&self) -> bool {
        self.0[0] & FREQ_44K1 != 0
    }

    pub fn is_48k(&self) -> bool {
        self.0[0] & FREQ_48K != 0
    }

    pub fn is_mono(&self) -> bool {
        self.0[0] & MODE_MONO != 0
    }

    /// Sample rate selected by the configuration; 16 kHz when no other rate bit is set.
    ///
    /// Bits are checked from 32 kHz downwards, so the first match wins when a peer
    /// sets several.
    pub fn sample_rate(&self) -> u32 {
        if self.is_32k() {
            32_000
        } else if self.is_44k1() {
            44_100
        } else if self.is_48k() {
            48_000
        } else {
            16_000
        }
    }

    pub fn channels(&self) -> u16 {
        if self.is_mono() { 1 } else { 2 }
    }

    pub fn sink_format(&self) -> SinkFormat {
        SinkFormat {
            sample_rate: self.sample_rate(),
            channels: self.channels(),
        }
    }
}

/// Output format implied by a codec configuration, if the codec is supported.
pub fn sink_format_for(codec: CodecKind, octets: &[u8]) -> Option<SinkFormat> {
    match codec {
        CodecKind::Sbc => SbcConfig::from_octets(octets).map(|cfg| cfg.sink_format()),
        _ => None,
    }
}
