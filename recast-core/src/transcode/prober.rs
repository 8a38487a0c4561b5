//! Encoder and decoder availability queries.

use std::sync::Arc;

use tracing::{debug, warn};

use super::dimensions::Dimensions;
use crate::codec::{CodecCapabilities, CodecError, CodecInfo, CodecPlatform, ColorFormat, VideoCodec};

/// Colour format used when a codec reports none at all.
pub const DEFAULT_COLOR_FORMAT: ColorFormat = ColorFormat::YuvFlexible420;

/// Read-only view of the platform's codec table.
///
/// Availability questions never fail: a broken codec list is logged and
/// answered with "unsupported".
#[derive(Clone)]
pub struct CapabilityProber {
    platform: Arc<dyn CodecPlatform>,
    probe_size: Dimensions,
}

impl CapabilityProber {
    pub fn new(platform: Arc<dyn CodecPlatform>, probe_size: Dimensions) -> Self {
        Self {
            platform,
            probe_size,
        }
    }

    /// Returns true when some encoder handles `codec` at the probe size.
    pub fn is_encoder_supported(&self, codec: VideoCodec) -> bool {
        let mime = codec.mime();
        match self.platform.codec_infos() {
            Ok(infos) => infos.iter().any(|info| {
                info.is_encoder
                    && info.supports_type(mime)
                    && info
                        .capabilities
                        .supports_size(self.probe_size.width, self.probe_size.height)
            }),
            Err(e) => {
                warn!("Encoder query for {mime} failed, treating as unsupported: {e}");
                false
            }
        }
    }

    /// Returns true when some decoder handles `mime`.
    pub fn is_decoder_supported(&self, mime: &str) -> bool {
        match self.platform.codec_infos() {
            Ok(infos) => infos
                .iter()
                .any(|info| !info.is_encoder && info.supports_type(mime)),
            Err(e) => {
                warn!("Decoder query for {mime} failed, treating as unsupported: {e}");
                false
            }
        }
    }

    /// Picks the encoder to use for `codec`, hardware first.
    ///
    /// # Errors
    /// - `CodecError::NoCodec` - No encoder handles the codec's mime type
    /// - `CodecError::Platform` - The codec list could not be queried
    pub fn preferred_encoder(&self, codec: VideoCodec) -> Result<CodecInfo, CodecError> {
        let mime = codec.mime();
        let mut candidates: Vec<CodecInfo> = self
            .platform
            .codec_infos()?
            .into_iter()
            .filter(|info| info.is_encoder && info.supports_type(mime))
            .collect();

        // Stable sort keeps platform order within each group.
        candidates.sort_by_key(|info| !info.hardware_accelerated);
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| CodecError::NoCodec {
                mime: mime.to_string(),
            })
    }

    /// Declared capabilities of the codec registered as `name`, if listed.
    pub fn capabilities_of(&self, name: &str) -> Option<CodecCapabilities> {
        match self.platform.codec_infos() {
            Ok(infos) => infos
                .into_iter()
                .find(|info| info.name == name)
                .map(|info| info.capabilities),
            Err(e) => {
                debug!("Capability lookup for {name} failed: {e}");
                None
            }
        }
    }

    /// Returns `requested` when the device can encode it, H.264 otherwise.
    pub fn resolve_codec(&self, requested: VideoCodec) -> VideoCodec {
        if requested == VideoCodec::H264 || self.is_encoder_supported(requested) {
            return requested;
        }
        warn!("No encoder for {requested}, falling back to h264");
        VideoCodec::H264
    }

    /// Every encoder on the device, for diagnostics.
    ///
    /// # Errors
    /// - `CodecError::Platform` - The codec list could not be queried
    pub fn describe(&self) -> Result<Vec<CodecInfo>, CodecError> {
        let encoders: Vec<CodecInfo> = self
            .platform
            .codec_infos()?
            .into_iter()
            .filter(|info| info.is_encoder)
            .collect();
        debug!("{} reports {} encoders", self.platform.name(), encoders.len());
        Ok(encoders)
    }
}

/// Picks an input colour format: surface, then flexible, semi-planar and
/// planar YUV 4:2:0, then whatever the codec lists first.
pub fn select_color_format(caps: &CodecCapabilities) -> ColorFormat {
    ColorFormat::PRIORITY
        .iter()
        .copied()
        .find(|format| caps.supports_color_format(*format))
        .or_else(|| caps.color_formats.first().copied())
        .unwrap_or(DEFAULT_COLOR_FORMAT)
}

/// Like `select_color_format` but for CPU buffer input, where the opaque
/// surface format is unusable.
pub fn select_buffer_color_format(caps: &CodecCapabilities) -> ColorFormat {
    ColorFormat::PRIORITY
        .iter()
        .copied()
        .filter(|format| *format != ColorFormat::Surface)
        .find(|format| caps.supports_color_format(*format))
        .or_else(|| {
            caps.color_formats
                .iter()
                .copied()
                .find(|format| *format != ColorFormat::Surface)
        })
        .unwrap_or(DEFAULT_COLOR_FORMAT)
}
