//! Production codec platform over FFmpeg.
//!
//! Maps the slot based codec model onto libavcodec's send/receive API.
//! Encoder discovery walks a fixed list of hardware and software encoder
//! names per codec and keeps the ones this FFmpeg build knows about.

mod decoder;
mod encoder;
mod extractor;
mod frames;
mod muxer;
mod slots;

use std::ops::{Deref, DerefMut};
use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::{Rational, codec, format::Pixel};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    CodecCapabilities, CodecError, CodecInfo, CodecPlatform, CodecResult, ColorFormat, Extractor,
    MIME_AAC, MIME_AUDIO_PREFIX, MIME_AV1, MIME_AVC, MIME_HEVC, MIME_VIDEO_PREFIX, Muxer,
    VideoCodec,
};
use super::Codec;

pub use decoder::FfmpegDecoder;
pub use encoder::FfmpegEncoder;
pub use extractor::FfmpegExtractor;
pub use muxer::FfmpegMuxer;

/// Time base of every timestamp crossing the codec boundary.
pub(crate) const MICROS: Rational = Rational(1, 1_000_000);

/// Encoder names probed per codec, hardware first.
const ENCODER_CANDIDATES: &[(VideoCodec, &[&str])] = &[
    (
        VideoCodec::H264,
        &[
            "h264_nvenc",
            "h264_qsv",
            "h264_videotoolbox",
            "h264_amf",
            "libx264",
            "libopenh264",
        ],
    ),
    (
        VideoCodec::Hevc,
        &["hevc_nvenc", "hevc_qsv", "hevc_videotoolbox", "hevc_amf", "libx265"],
    ),
    (
        VideoCodec::Av1,
        &["av1_nvenc", "av1_qsv", "av1_amf", "libsvtav1", "libaom-av1", "librav1e"],
    ),
];

const HARDWARE_MARKERS: [&str; 4] = ["nvenc", "qsv", "videotoolbox", "amf"];

/// FFmpeg object owned by exactly one adapter.
///
/// libav contexts carry no thread affinity; they only need exclusive access,
/// which the adapter's `&mut self` methods guarantee. `Send` is granted per
/// wrapped libav type.
pub(crate) struct Owned<T>(pub T);

// SAFETY: each object is reachable only through the adapter that owns it and
// is touched through `&mut self` or under `StreamParameters`' lock. None of
// them hands out pointers that outlive the borrow.
unsafe impl Send for Owned<ffmpeg::format::context::Input> {}
unsafe impl Send for Owned<ffmpeg::format::context::Output> {}
unsafe impl Send for Owned<ffmpeg::Packet> {}
unsafe impl Send for Owned<ffmpeg::util::frame::Video> {}
unsafe impl Send for Owned<codec::Parameters> {}
unsafe impl Send for Owned<codec::decoder::Video> {}
unsafe impl Send for Owned<codec::encoder::video::Encoder> {}
unsafe impl Send for Owned<ffmpeg::software::scaling::Context> {}

impl<T> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Owned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Codec parameters that travel in `MediaFormat::native` from the extractor
/// to the decoder and muxer, and from the encoder to the muxer.
pub(crate) struct StreamParameters {
    parameters: Mutex<Owned<codec::Parameters>>,
}

impl StreamParameters {
    pub(crate) fn new(parameters: codec::Parameters) -> Self {
        Self {
            parameters: Mutex::new(Owned(parameters)),
        }
    }

    /// Owned copy for a new codec context or output stream.
    pub(crate) fn get(&self) -> codec::Parameters {
        self.parameters.lock().0.clone()
    }
}

/// Picture rendered onto an `InputSurface` by an FFmpeg decoder.
pub(crate) struct FfmpegPicture(pub Owned<ffmpeg::util::frame::Video>);

pub(crate) fn platform_error(operation: &str, e: ffmpeg::Error) -> CodecError {
    CodecError::Platform {
        reason: format!("{operation}: {e}"),
    }
}

pub(crate) fn mime_for(id: codec::Id, medium: ffmpeg::media::Type) -> String {
    match id {
        codec::Id::H264 => MIME_AVC.to_string(),
        codec::Id::HEVC => MIME_HEVC.to_string(),
        codec::Id::AV1 => MIME_AV1.to_string(),
        codec::Id::AAC => MIME_AAC.to_string(),
        other => match medium {
            ffmpeg::media::Type::Audio => format!("{MIME_AUDIO_PREFIX}{}", other.name()),
            ffmpeg::media::Type::Video => format!("{MIME_VIDEO_PREFIX}{}", other.name()),
            _ => format!("application/{}", other.name()),
        },
    }
}

pub(crate) fn codec_id_for(mime: &str) -> Option<codec::Id> {
    match mime.to_ascii_lowercase().as_str() {
        MIME_AVC => Some(codec::Id::H264),
        MIME_HEVC => Some(codec::Id::HEVC),
        MIME_AV1 => Some(codec::Id::AV1),
        MIME_AAC => Some(codec::Id::AAC),
        _ => None,
    }
}

fn is_hardware(name: &str) -> bool {
    HARDWARE_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Input layouts an encoder accepts, in our vocabulary. Every FFmpeg
/// encoder can take surface frames since the adapter converts them.
fn encoder_color_formats(codec: codec::Codec) -> Vec<ColorFormat> {
    let mut formats = vec![ColorFormat::Surface, ColorFormat::YuvFlexible420];
    let pixels: Vec<Pixel> = codec
        .video()
        .ok()
        .and_then(|video| video.formats())
        .map(Iterator::collect)
        .unwrap_or_default();
    if pixels.is_empty() || pixels.contains(&Pixel::YUV420P) {
        formats.push(ColorFormat::YuvPlanar420);
    }
    if pixels.contains(&Pixel::NV12) {
        formats.push(ColorFormat::YuvSemiPlanar420);
    }
    formats
}

fn encoder_capabilities(name: &str, codec: codec::Codec) -> CodecCapabilities {
    let hardware = is_hardware(name);
    CodecCapabilities {
        color_formats: encoder_color_formats(codec),
        max_width: if hardware { 4096 } else { 8192 },
        max_height: if hardware { 4096 } else { 4320 },
        max_bit_rate: 200_000_000,
        max_frame_rate: 240,
    }
}

/// Codec platform backed by the linked FFmpeg libraries.
pub struct FfmpegPlatform {
    infos: Vec<CodecInfo>,
}

impl FfmpegPlatform {
    /// Initializes libav and discovers the installed encoders.
    ///
    /// # Errors
    /// - `CodecError::Platform` - FFmpeg failed to initialize
    pub fn new() -> CodecResult<Self> {
        ffmpeg::init().map_err(|e| platform_error("initializing FFmpeg", e))?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        let infos = discover_codecs();
        info!(
            "FFmpeg platform ready with {} encoders: {}",
            infos.iter().filter(|info| info.is_encoder).count(),
            infos
                .iter()
                .filter(|info| info.is_encoder)
                .map(|info| info.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self { infos })
    }
}

fn discover_codecs() -> Vec<CodecInfo> {
    let mut infos = Vec::new();

    for (video, names) in ENCODER_CANDIDATES {
        for name in *names {
            let Some(codec) = ffmpeg::encoder::find_by_name(name) else {
                continue;
            };
            debug!("Found {video} encoder {name}");
            infos.push(CodecInfo {
                name: (*name).to_string(),
                is_encoder: true,
                hardware_accelerated: is_hardware(name),
                supported_types: vec![video.mime().to_string()],
                capabilities: encoder_capabilities(name, codec),
            });
        }

        let Some(id) = codec_id_for(video.mime()) else {
            continue;
        };
        if let Some(codec) = ffmpeg::decoder::find(id) {
            infos.push(CodecInfo {
                name: codec.name().to_string(),
                is_encoder: false,
                hardware_accelerated: false,
                supported_types: vec![video.mime().to_string()],
                capabilities: CodecCapabilities::default(),
            });
        }
    }
    infos
}

impl CodecPlatform for FfmpegPlatform {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn codec_infos(&self) -> CodecResult<Vec<CodecInfo>> {
        Ok(self.infos.clone())
    }

    fn open_extractor(&self, path: &Path) -> CodecResult<Box<dyn Extractor>> {
        Ok(Box::new(FfmpegExtractor::open(path)?))
    }

    fn create_decoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        let codec = codec_id_for(mime)
            .and_then(ffmpeg::decoder::find)
            .ok_or_else(|| CodecError::NoCodec {
                mime: mime.to_string(),
            })?;
        Ok(Box::new(FfmpegDecoder::new(codec)))
    }

    fn create_encoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        let codec = codec_id_for(mime)
            .and_then(ffmpeg::encoder::find)
            .ok_or_else(|| CodecError::NoCodec {
                mime: mime.to_string(),
            })?;
        Ok(Box::new(FfmpegEncoder::new(codec, mime)))
    }

    fn create_codec_by_name(&self, name: &str) -> CodecResult<Box<dyn Codec>> {
        let info = self
            .infos
            .iter()
            .find(|info| info.name == name)
            .ok_or_else(|| CodecError::NoCodec {
                mime: name.to_string(),
            })?;
        let mime = info.supported_types.first().cloned().unwrap_or_default();

        if info.is_encoder {
            let codec = ffmpeg::encoder::find_by_name(name)
                .ok_or_else(|| CodecError::NoCodec { mime: mime.clone() })?;
            Ok(Box::new(FfmpegEncoder::new(codec, &mime)))
        } else {
            let codec = ffmpeg::decoder::find_by_name(name)
                .ok_or_else(|| CodecError::NoCodec { mime: mime.clone() })?;
            Ok(Box::new(FfmpegDecoder::new(codec)))
        }
    }

    fn create_muxer(&self, path: &Path) -> CodecResult<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer::create(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_mapping_round_trips_known_codecs() {
        for mime in [MIME_AVC, MIME_HEVC, MIME_AV1, MIME_AAC] {
            let id = codec_id_for(mime).unwrap();
            let medium = if mime == MIME_AAC {
                ffmpeg::media::Type::Audio
            } else {
                ffmpeg::media::Type::Video
            };
            assert_eq!(mime_for(id, medium), mime);
        }
        assert_eq!(codec_id_for("video/x-unknown"), None);
    }

    #[test]
    fn test_hardware_encoders_are_listed_first() {
        for (_, names) in ENCODER_CANDIDATES {
            let first_software = names.iter().position(|name| !is_hardware(name)).unwrap();
            assert!(names[first_software..].iter().all(|name| !is_hardware(name)));
        }
    }

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_adapters_cross_threads() {
        assert_send::<FfmpegExtractor>();
        assert_send::<FfmpegDecoder>();
        assert_send::<FfmpegEncoder>();
        assert_send::<FfmpegMuxer>();
        assert_send::<FfmpegPicture>();
        assert_send::<frames::Converter>();
        assert_sync::<StreamParameters>();
    }
}
