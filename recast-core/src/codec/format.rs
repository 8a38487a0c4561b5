//! Media format descriptions exchanged across the codec boundary

use std::any::Any;
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Prefix shared by every video mime type.
pub const MIME_VIDEO_PREFIX: &str = "video/";
/// Prefix shared by every audio mime type.
pub const MIME_AUDIO_PREFIX: &str = "audio/";

pub const MIME_AVC: &str = "video/avc";
pub const MIME_HEVC: &str = "video/hevc";
pub const MIME_AV1: &str = "video/av01";
pub const MIME_AAC: &str = "audio/mp4a-latm";

/// Video codecs the pipeline can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC, the universally available fallback
    #[default]
    #[serde(alias = "avc")]
    H264,
    /// H.265 / HEVC
    #[serde(alias = "h265")]
    Hevc,
    /// AV1, only used when the device reports an encoder for it
    Av1,
}

impl VideoCodec {
    /// Mime type used when asking the platform for codecs.
    pub fn mime(self) -> &'static str {
        match self {
            VideoCodec::H264 => MIME_AVC,
            VideoCodec::Hevc => MIME_HEVC,
            VideoCodec::Av1 => MIME_AV1,
        }
    }

    /// Maps a mime type back to a codec.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            MIME_AVC => Some(VideoCodec::H264),
            MIME_HEVC => Some(VideoCodec::Hevc),
            MIME_AV1 => Some(VideoCodec::Av1),
            _ => None,
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h264" | "avc" => Ok(VideoCodec::H264),
            "hevc" | "h265" => Ok(VideoCodec::Hevc),
            "av1" => Ok(VideoCodec::Av1),
            _ => Err(format!("Unknown video codec: {s}")),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::Hevc => write!(f, "hevc"),
            VideoCodec::Av1 => write!(f, "av1"),
        }
    }
}

/// Pixel layouts an encoder may accept on its input side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Opaque frames delivered through an input surface
    Surface,
    /// Any YUV 4:2:0 layout the codec picks
    YuvFlexible420,
    /// NV12 style interleaved chroma
    YuvSemiPlanar420,
    /// I420 style planar chroma
    YuvPlanar420,
    /// Vendor specific format identifier
    Other(u32),
}

impl ColorFormat {
    /// Preference order used when a codec advertises several formats.
    pub const PRIORITY: [ColorFormat; 4] = [
        ColorFormat::Surface,
        ColorFormat::YuvFlexible420,
        ColorFormat::YuvSemiPlanar420,
        ColorFormat::YuvPlanar420,
    ];
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorFormat::Surface => write!(f, "surface"),
            ColorFormat::YuvFlexible420 => write!(f, "yuv420-flexible"),
            ColorFormat::YuvSemiPlanar420 => write!(f, "yuv420-semiplanar"),
            ColorFormat::YuvPlanar420 => write!(f, "yuv420-planar"),
            ColorFormat::Other(id) => write!(f, "vendor-{id:#x}"),
        }
    }
}

/// Per-sample flags carried alongside compressed and decoded buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    /// Sync sample, independently decodable
    pub const KEY_FRAME: Self = Self(1);
    /// Codec private data rather than media
    pub const CODEC_CONFIG: Self = Self(2);
    /// Last buffer of the stream
    pub const END_OF_STREAM: Self = Self(4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub const fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub const fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Describes the payload region of a codec buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of valid data within the buffer
    pub offset: usize,
    /// Number of valid bytes
    pub size: usize,
    /// Presentation timestamp in microseconds
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Empty buffer that only carries the end-of-stream flag.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, 0, presentation_time_us, SampleFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }
}

/// Result of polling a codec's output side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// An output buffer is ready at `index`
    Buffer { index: usize, info: BufferInfo },
    /// The output format changed; read it with `Codec::output_format`
    FormatChanged,
    /// Nothing became available within the timeout
    TryAgainLater,
}

/// Crop rectangle applied to the source picture before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true when the rectangle has a usable area.
    pub fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl FromStr for CropRect {
    type Err = String;

    /// Parses `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("Crop must be x,y,width,height: {s}"));
        }

        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("Invalid crop component: {part}"))?;
        }

        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

/// Backend specific state that travels with a format, such as native codec
/// parameter blocks. Opaque to the pipeline.
#[derive(Clone)]
pub struct NativeHandle(Arc<dyn Any + Send + Sync>);

impl NativeHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeHandle(..)")
    }
}

/// Key/value description of a track or codec configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_us: Option<i64>,
    pub bit_rate: Option<u32>,
    pub frame_rate: Option<u32>,
    pub color_format: Option<ColorFormat>,
    pub key_frame_interval_secs: Option<u32>,
    pub rotation_degrees: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    pub max_input_size: Option<usize>,
    #[serde(default)]
    pub hdr: bool,
    pub crop: Option<CropRect>,
    #[serde(skip)]
    pub native: Option<NativeHandle>,
}

impl MediaFormat {
    /// Creates a video format with the given coded size.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Creates an audio format.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with(MIME_VIDEO_PREFIX)
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with(MIME_AUDIO_PREFIX)
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_color_format(mut self, color_format: Option<ColorFormat>) -> Self {
        self.color_format = color_format;
        self
    }

    pub fn with_key_frame_interval(mut self, seconds: u32) -> Self {
        self.key_frame_interval_secs = Some(seconds);
        self
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = Some(degrees);
        self
    }

    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }
}
