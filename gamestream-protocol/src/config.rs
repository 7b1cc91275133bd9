//! Stream Configuration
//!
//! Caller-supplied parameters for a streaming session: resolution, refresh
//! rates, bitrate, packet size, codec support mask, audio layout, color
//! description, encryption scope and gamepad attachment. The configuration
//! is immutable once a session starts.

use crate::Result;

/// Supported video formats, passed in [`StreamConfiguration::supported_video_formats`]
pub const VIDEO_FORMAT_H264: u32 = 0x0001;
pub const VIDEO_FORMAT_H264_HIGH8_444: u32 = 0x0004;
pub const VIDEO_FORMAT_H265: u32 = 0x0100;
pub const VIDEO_FORMAT_H265_MAIN10: u32 = 0x0200;
pub const VIDEO_FORMAT_H265_REXT8_444: u32 = 0x0400;
pub const VIDEO_FORMAT_H265_REXT10_444: u32 = 0x0800;
pub const VIDEO_FORMAT_AV1_MAIN8: u32 = 0x1000;
pub const VIDEO_FORMAT_AV1_MAIN10: u32 = 0x2000;
pub const VIDEO_FORMAT_AV1_HIGH8_444: u32 = 0x4000;
pub const VIDEO_FORMAT_AV1_HIGH10_444: u32 = 0x8000;

/// Codec-family masks for matching formats without profile detail
pub const VIDEO_FORMAT_MASK_H264: u32 = 0x000F;
pub const VIDEO_FORMAT_MASK_H265: u32 = 0x0F00;
pub const VIDEO_FORMAT_MASK_AV1: u32 = 0xF000;
pub const VIDEO_FORMAT_MASK_10BIT: u32 = 0xAA00;
pub const VIDEO_FORMAT_MASK_YUV444: u32 = 0xCC04;

/// Encryption scopes for the media streams
pub const ENCFLG_NONE: u32 = 0x0000_0000;
pub const ENCFLG_AUDIO: u32 = 0x0000_0001;
pub const ENCFLG_VIDEO: u32 = 0x0000_0002;
pub const ENCFLG_ALL: u32 = 0xFFFF_FFFF;

/// Whether the stream crosses the local network boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    Local,
    Remote,
    #[default]
    Auto,
}

/// Encoder color space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Rec601,
    Rec709,
    Rec2020,
}

/// Encoder color range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    #[default]
    Limited,
    Full,
}

/// Audio channel layout: channel count plus speaker mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfiguration {
    pub channel_count: u32,
    pub channel_mask: u32,
}

/// Stereo layout (2 channels)
pub const AUDIO_CONFIGURATION_STEREO: AudioConfiguration = AudioConfiguration {
    channel_count: 2,
    channel_mask: 0x3,
};

/// 5.1 surround layout (6 channels)
pub const AUDIO_CONFIGURATION_51_SURROUND: AudioConfiguration = AudioConfiguration {
    channel_count: 6,
    channel_mask: 0x3F,
};

/// 7.1 surround layout (8 channels)
pub const AUDIO_CONFIGURATION_71_SURROUND: AudioConfiguration = AudioConfiguration {
    channel_count: 8,
    channel_mask: 0x63F,
};

impl AudioConfiguration {
    /// Wire encoding used by the `surroundAudioInfo` launch parameter
    pub fn surround_audio_info(&self) -> u32 {
        (self.channel_mask << 16) | self.channel_count
    }
}

impl Default for AudioConfiguration {
    fn default() -> Self {
        AUDIO_CONFIGURATION_STEREO
    }
}

/// Per-session AES key material for the remote input stream
///
/// Sent to the host as `rikey`/`rikeyid` at launch and handed to the
/// streaming engine so both ends encrypt input identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteInputKey {
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

impl RemoteInputKey {
    /// Generate fresh random key material
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        openssl::rand::rand_bytes(&mut key)?;
        openssl::rand::rand_bytes(&mut iv)?;
        Ok(Self { key, iv })
    }
}

/// Requested parameters for a streaming session
///
/// The default is a conservative 720p60 H.264 stereo stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    /// Stream dimensions in pixels
    pub width: u32,
    pub height: u32,

    /// Desired stream frame rate
    pub fps: u32,

    /// Refresh rate sent with the launch request
    pub launch_refresh_rate: u32,

    /// Client display refresh rate x 100 (e.g. 5994 for 59.94 Hz)
    pub client_refresh_rate_x100: u32,

    /// Video bitrate in kbps, including error-correction overhead
    pub bitrate_kbps: u32,

    /// Maximum video packet size in bytes; capped at 1024 for remote streams
    pub packet_size: u32,

    /// Remote streaming optimizations
    pub mode: StreamingMode,

    /// Let the host optimize its display settings for the stream
    pub sops: bool,

    /// Keep playing audio on the host instead of forwarding it
    pub play_local_audio: bool,

    /// Audio channel layout
    pub audio: AudioConfiguration,

    /// Mask of video formats the client can decode
    pub supported_video_formats: u32,

    /// Bitmask of attached gamepads, bit per controller slot
    pub gamepad_mask: u32,

    /// Keep virtual gamepads attached on the host after disconnect
    pub persist_gamepads: bool,

    /// Streams where encryption may be enabled when the host supports it
    pub encryption_flags: u32,

    pub color_space: ColorSpace,
    pub color_range: ColorRange,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            launch_refresh_rate: 60,
            client_refresh_rate_x100: 0,
            bitrate_kbps: 10_000,
            packet_size: 1024,
            mode: StreamingMode::Auto,
            sops: true,
            play_local_audio: false,
            audio: AUDIO_CONFIGURATION_STEREO,
            supported_video_formats: VIDEO_FORMAT_H264,
            gamepad_mask: 0,
            persist_gamepads: false,
            encryption_flags: ENCFLG_ALL,
            color_space: ColorSpace::default(),
            color_range: ColorRange::default(),
        }
    }
}

impl StreamConfiguration {
    /// Set the gamepad attachment bitmask directly
    pub fn set_gamepad_mask(&mut self, mask: u32) {
        self.gamepad_mask = mask;
    }

    /// Set the gamepad attachment bitmask from a controller count
    ///
    /// Attaches the low-order slots, up to the four the protocol carries.
    pub fn set_gamepads_by_count(&mut self, count: u32) {
        self.gamepad_mask = 0;
        for slot in 0..4 {
            if count > slot {
                self.gamepad_mask |= 1 << slot;
            }
        }
    }

    /// Whether the requested format set asks for a 10-bit (HDR) stream
    pub fn requests_hdr(&self) -> bool {
        self.supported_video_formats & VIDEO_FORMAT_MASK_10BIT != 0
    }

    /// Whether the format set is limited to the H.264 family
    pub fn is_h264_only(&self) -> bool {
        self.supported_video_formats & !VIDEO_FORMAT_MASK_H264 == 0
    }
}
