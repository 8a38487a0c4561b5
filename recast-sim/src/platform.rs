//! Simulated codec platform with fault injection.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use recast_core::codec::{
    Codec, CodecCapabilities, CodecError, CodecInfo, CodecPlatform, CodecResult, ColorFormat,
    Extractor, MIME_AVC, MIME_HEVC, MediaFormat, Muxer,
};
use tracing::debug;

use crate::codec::{CodecFaults, CodecRole, SimCodec};
use crate::extractor::SimExtractor;
use crate::muxer::SimMuxer;

/// Decides whether the device refuses an encoder configuration. Receives the
/// codec name and the requested format; returning true rejects it.
pub type ConfigPredicate = Arc<dyn Fn(&str, &MediaFormat) -> bool + Send + Sync>;

/// Live counters of everything the platform handed out.
#[derive(Debug, Default)]
pub struct SimStats {
    decoders_created: AtomicUsize,
    encoders_created: AtomicUsize,
    codecs_released: AtomicUsize,
    extractors_opened: AtomicUsize,
    muxers_created: AtomicUsize,
    surfaces_created: AtomicUsize,
    encoder_configures: AtomicUsize,
    encoder_rejections: AtomicUsize,
}

impl SimStats {
    pub(crate) fn record_configure(&self) {
        self.encoder_configures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.encoder_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_surface(&self) {
        self.surfaces_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.codecs_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SimStatsSnapshot {
        SimStatsSnapshot {
            decoders_created: self.decoders_created.load(Ordering::Relaxed),
            encoders_created: self.encoders_created.load(Ordering::Relaxed),
            codecs_released: self.codecs_released.load(Ordering::Relaxed),
            extractors_opened: self.extractors_opened.load(Ordering::Relaxed),
            muxers_created: self.muxers_created.load(Ordering::Relaxed),
            surfaces_created: self.surfaces_created.load(Ordering::Relaxed),
            encoder_configures: self.encoder_configures.load(Ordering::Relaxed),
            encoder_rejections: self.encoder_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `SimStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimStatsSnapshot {
    pub decoders_created: usize,
    pub encoders_created: usize,
    pub codecs_released: usize,
    pub extractors_opened: usize,
    pub muxers_created: usize,
    pub surfaces_created: usize,
    pub encoder_configures: usize,
    pub encoder_rejections: usize,
}

impl SimStatsSnapshot {
    pub fn codecs_created(&self) -> usize {
        self.decoders_created + self.encoders_created
    }

    /// Codecs created but not yet released.
    pub fn live_codecs(&self) -> usize {
        self.codecs_created().saturating_sub(self.codecs_released)
    }
}

/// Device model used by tests, demos and the CLI's `--simulate` mode.
pub struct SimulatedPlatform {
    codecs: Vec<CodecInfo>,
    listing_available: bool,
    faults: CodecFaults,
    audio_write_budget: Option<usize>,
    stats: Arc<SimStats>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SimulatedPlatformBuilder {
        SimulatedPlatformBuilder::new()
    }

    pub fn stats(&self) -> SimStatsSnapshot {
        self.stats.snapshot()
    }

    /// Codec table of a mid-range device: hardware AVC and HEVC encoders, a
    /// software AVC encoder and matching decoders. No AV1.
    pub fn default_codecs() -> Vec<CodecInfo> {
        let hardware = CodecCapabilities {
            color_formats: vec![
                ColorFormat::Surface,
                ColorFormat::YuvSemiPlanar420,
                ColorFormat::YuvFlexible420,
            ],
            max_width: 3840,
            max_height: 2160,
            max_bit_rate: 40_000_000,
            max_frame_rate: 60,
        };
        let software = CodecCapabilities {
            color_formats: vec![ColorFormat::YuvPlanar420, ColorFormat::YuvFlexible420],
            max_width: 1920,
            max_height: 1088,
            max_bit_rate: 12_000_000,
            max_frame_rate: 30,
        };

        vec![
            sim_codec_info("sim.avc.decoder", MIME_AVC, false, true, hardware.clone()),
            sim_codec_info("sim.hevc.decoder", MIME_HEVC, false, true, hardware.clone()),
            sim_codec_info("sim.avc.encoder.hw", MIME_AVC, true, true, hardware.clone()),
            sim_codec_info("sim.hevc.encoder.hw", MIME_HEVC, true, true, hardware),
            sim_codec_info("sim.avc.encoder.sw", MIME_AVC, true, false, software),
        ]
    }

    fn find(&self, mime: &str, encoder: bool) -> CodecResult<&CodecInfo> {
        self.codecs
            .iter()
            .filter(|info| info.is_encoder == encoder && info.supports_type(mime))
            .max_by_key(|info| info.hardware_accelerated)
            .ok_or_else(|| CodecError::NoCodec {
                mime: mime.to_string(),
            })
    }

    fn instantiate(&self, info: &CodecInfo, mime: &str) -> Box<dyn Codec> {
        let role = if info.is_encoder {
            self.stats.encoders_created.fetch_add(1, Ordering::Relaxed);
            CodecRole::Encoder
        } else {
            self.stats.decoders_created.fetch_add(1, Ordering::Relaxed);
            CodecRole::Decoder
        };
        debug!("Created simulated {role:?} {}", info.name);
        Box::new(SimCodec::new(
            info.name.clone(),
            mime,
            role,
            info.capabilities.clone(),
            self.faults.clone(),
            Arc::clone(&self.stats),
        ))
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn sim_codec_info(
    name: &str,
    mime: &str,
    is_encoder: bool,
    hardware_accelerated: bool,
    capabilities: CodecCapabilities,
) -> CodecInfo {
    CodecInfo {
        name: name.to_string(),
        is_encoder,
        hardware_accelerated,
        supported_types: vec![mime.to_string()],
        capabilities,
    }
}

impl CodecPlatform for SimulatedPlatform {
    fn name(&self) -> &str {
        "simulated"
    }

    fn codec_infos(&self) -> CodecResult<Vec<CodecInfo>> {
        if !self.listing_available {
            return Err(CodecError::Platform {
                reason: "codec list query failed".to_string(),
            });
        }
        Ok(self.codecs.clone())
    }

    fn open_extractor(&self, path: &Path) -> CodecResult<Box<dyn Extractor>> {
        let extractor = SimExtractor::open(path)?;
        self.stats.extractors_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(extractor))
    }

    fn create_decoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        let info = self.find(mime, false)?;
        Ok(self.instantiate(info, mime))
    }

    fn create_encoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        let info = self.find(mime, true)?;
        Ok(self.instantiate(info, mime))
    }

    fn create_codec_by_name(&self, name: &str) -> CodecResult<Box<dyn Codec>> {
        let info = self
            .codecs
            .iter()
            .find(|info| info.name == name)
            .ok_or_else(|| CodecError::NoCodec {
                mime: name.to_string(),
            })?;
        let mime = info.supported_types.first().cloned().unwrap_or_default();
        Ok(self.instantiate(info, &mime))
    }

    fn create_muxer(&self, path: &Path) -> CodecResult<Box<dyn Muxer>> {
        let muxer = SimMuxer::create(path, self.audio_write_budget)?;
        self.stats.muxers_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(muxer))
    }
}

/// Builder for `SimulatedPlatform`.
pub struct SimulatedPlatformBuilder {
    codecs: Vec<CodecInfo>,
    listing_available: bool,
    faults: CodecFaults,
    audio_write_budget: Option<usize>,
}

impl SimulatedPlatformBuilder {
    pub fn new() -> Self {
        Self {
            codecs: SimulatedPlatform::default_codecs(),
            listing_available: true,
            faults: CodecFaults {
                surface_supported: true,
                ..Default::default()
            },
            audio_write_budget: None,
        }
    }

    /// Encoders refuse to create input surfaces.
    pub fn without_surface_support(mut self) -> Self {
        self.faults.surface_supported = false;
        self
    }

    /// Encoders refuse configurations for which `predicate` returns true.
    pub fn reject_encoder_config(
        mut self,
        predicate: impl Fn(&str, &MediaFormat) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.faults.reject = Some(Arc::new(predicate));
        self
    }

    /// Decoders fail to render onto a surface after `frames` successful renders.
    pub fn fail_surface_render_after(mut self, frames: u64) -> Self {
        self.faults.render_failures_after = Some(frames);
        self
    }

    /// The codec list query fails; codecs can still be created by type.
    pub fn without_encoder_listing(mut self) -> Self {
        self.listing_available = false;
        self
    }

    pub fn with_codec_infos(mut self, codecs: Vec<CodecInfo>) -> Self {
        self.codecs = codecs;
        self
    }

    /// Muxers reject audio samples after `samples` successful writes.
    pub fn fail_audio_writes_after(mut self, samples: usize) -> Self {
        self.audio_write_budget = Some(samples);
        self
    }

    pub fn build(self) -> SimulatedPlatform {
        SimulatedPlatform {
            codecs: self.codecs,
            listing_available: self.listing_available,
            faults: self.faults,
            audio_write_budget: self.audio_write_budget,
            stats: Arc::new(SimStats::default()),
        }
    }
}

impl Default for SimulatedPlatformBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use recast_core::codec::MIME_AV1;

    use super::*;

    #[test]
    fn test_by_type_prefers_hardware() {
        let platform = SimulatedPlatform::new();
        let encoder = platform.create_encoder_by_type(MIME_AVC).unwrap();
        assert_eq!(encoder.name(), "sim.avc.encoder.hw");
        let decoder = platform.create_decoder_by_type(MIME_HEVC).unwrap();
        assert_eq!(decoder.name(), "sim.hevc.decoder");

        assert!(matches!(
            platform.create_encoder_by_type(MIME_AV1),
            Err(CodecError::NoCodec { .. })
        ));
        assert_eq!(platform.stats().codecs_created(), 2);
    }

    #[test]
    fn test_broken_listing_still_creates_codecs() {
        let platform = SimulatedPlatform::builder()
            .without_encoder_listing()
            .build();
        assert!(platform.codec_infos().is_err());
        assert!(platform.create_encoder_by_type(MIME_AVC).is_ok());
        assert!(platform.create_codec_by_name("sim.avc.encoder.sw").is_ok());
        assert!(platform.create_codec_by_name("unknown").is_err());
    }

    #[test]
    fn test_release_tracking() {
        let platform = SimulatedPlatform::new();
        let mut codec = platform.create_encoder_by_type(MIME_AVC).unwrap();
        assert_eq!(platform.stats().live_codecs(), 1);
        codec.release().unwrap();
        assert_eq!(platform.stats().live_codecs(), 0);
    }

    #[test]
    fn test_surface_support_toggle() {
        let format = MediaFormat::video(MIME_AVC, 1280, 720)
            .with_bit_rate(2_000_000)
            .with_frame_rate(30);

        let platform = SimulatedPlatform::builder()
            .without_surface_support()
            .build();
        let mut encoder = platform.create_encoder_by_type(MIME_AVC).unwrap();
        encoder.configure(&format, None).unwrap();
        assert!(matches!(
            encoder.create_input_surface(),
            Err(CodecError::Unsupported { .. })
        ));

        let platform = SimulatedPlatform::new();
        let mut encoder = platform.create_encoder_by_type(MIME_AVC).unwrap();
        encoder.configure(&format, None).unwrap();
        assert!(encoder.create_input_surface().is_ok());
        assert_eq!(platform.stats().surfaces_created, 1);
    }
}
