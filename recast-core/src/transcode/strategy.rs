//! Encoder configuration strategy chain.
//!
//! Encoders reject configurations for reasons that are rarely reported in a
//! useful way: unsupported sizes, bitrates outside a vendor range, alignment
//! requirements, or a colour format the hardware path cannot take. The chain
//! walks six progressively safer configurations and returns the first encoder
//! that configures and starts.

use std::fmt;

use tracing::{debug, info, warn};

use super::dimensions::{Dimensions, align_down, clamp_to_bounds};
use super::error::TranscodeError;
use super::prober::{
    CapabilityProber, DEFAULT_COLOR_FORMAT, select_buffer_color_format, select_color_format,
};
use crate::codec::{
    Codec, CodecCapabilities, CodecError, CodecPlatform, ColorFormat, CropRect, InputSurface,
    MediaFormat, VideoCodec,
};
use crate::config::EncoderLimits;

/// One entry of the strategy chain, in attempt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyTier {
    /// Preferred device encoder clamped to safe and declared limits
    CapabilityChecked,
    /// Requested parameters as given
    Basic,
    HalfBitrate,
    /// Half bitrate with edges rounded down to the macroblock alignment
    HalfBitrateAligned,
    /// Forced H.264 within conservative limits
    Conservative,
    /// Forced H.264 at the minimum safe baseline
    Baseline,
}

impl StrategyTier {
    pub const ORDERED: [StrategyTier; 6] = [
        StrategyTier::CapabilityChecked,
        StrategyTier::Basic,
        StrategyTier::HalfBitrate,
        StrategyTier::HalfBitrateAligned,
        StrategyTier::Conservative,
        StrategyTier::Baseline,
    ];

    /// 1-based position in the chain.
    pub fn number(self) -> usize {
        match self {
            StrategyTier::CapabilityChecked => 1,
            StrategyTier::Basic => 2,
            StrategyTier::HalfBitrate => 3,
            StrategyTier::HalfBitrateAligned => 4,
            StrategyTier::Conservative => 5,
            StrategyTier::Baseline => 6,
        }
    }
}

impl fmt::Display for StrategyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyTier::CapabilityChecked => "capability-checked",
            StrategyTier::Basic => "basic",
            StrategyTier::HalfBitrate => "half-bitrate",
            StrategyTier::HalfBitrateAligned => "half-bitrate-aligned",
            StrategyTier::Conservative => "conservative",
            StrategyTier::Baseline => "baseline",
        };
        write!(f, "tier {} ({name})", self.number())
    }
}

/// Encoder parameters requested by, or granted to, one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub codec: VideoCodec,
    pub dimensions: Dimensions,
    /// Bits per second
    pub bit_rate: u32,
    pub frame_rate: u32,
}

/// How decoded frames reach the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Decoder renders onto the encoder's input surface
    Surface,
    /// Decoded frames are copied through CPU buffers
    Buffer,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Surface => write!(f, "surface"),
            TransferMode::Buffer => write!(f, "buffer"),
        }
    }
}

/// Settings applied on top of every tier's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    pub mode: TransferMode,
    pub hdr: bool,
    pub crop: Option<CropRect>,
}

impl EncoderOptions {
    pub fn new(mode: TransferMode) -> Self {
        Self {
            mode,
            hdr: false,
            crop: None,
        }
    }
}

/// Started encoder handed back by the chain.
pub struct ConfiguredEncoder {
    pub codec: Box<dyn Codec>,
    pub params: EncoderParams,
    pub tier: StrategyTier,
    /// Colour format set on the winning configuration, `None` when left to the codec
    pub color_format: Option<ColorFormat>,
    pub key_frame_interval_secs: u32,
    /// Present on the surface path
    pub surface: Option<InputSurface>,
}

impl fmt::Debug for ConfiguredEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredEncoder")
            .field("codec", &self.codec.name())
            .field("params", &self.params)
            .field("tier", &self.tier)
            .field("color_format", &self.color_format)
            .field("key_frame_interval_secs", &self.key_frame_interval_secs)
            .field("surface", &self.surface)
            .finish()
    }
}

/// Parameters and encoder choice for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPlan {
    pub tier: StrategyTier,
    /// Specific codec name, `None` for the platform default for the mime
    pub encoder_name: Option<String>,
    pub params: EncoderParams,
    pub capabilities: Option<CodecCapabilities>,
}

/// Walks the tiers in order and returns the first encoder that starts.
pub struct EncoderStrategyChain<'a> {
    platform: &'a dyn CodecPlatform,
    prober: &'a CapabilityProber,
    limits: &'a EncoderLimits,
}

impl<'a> EncoderStrategyChain<'a> {
    pub fn new(
        platform: &'a dyn CodecPlatform,
        prober: &'a CapabilityProber,
        limits: &'a EncoderLimits,
    ) -> Self {
        Self {
            platform,
            prober,
            limits,
        }
    }

    /// Configures and starts an encoder for `requested`.
    ///
    /// # Errors
    /// - `TranscodeError::StrategyExhausted` - Every tier failed
    pub fn configure(
        &self,
        requested: &EncoderParams,
        options: &EncoderOptions,
    ) -> Result<ConfiguredEncoder, TranscodeError> {
        for tier in StrategyTier::ORDERED {
            let outcome = self
                .plan(tier, requested)
                .and_then(|plan| self.attempt(&plan, options));

            match outcome {
                Ok(encoder) => {
                    info!(
                        "Encoder {} configured by {tier}: {} {} @ {} bps, {} fps",
                        encoder.codec.name(),
                        encoder.params.codec,
                        encoder.params.dimensions,
                        encoder.params.bit_rate,
                        encoder.params.frame_rate
                    );
                    return Ok(encoder);
                }
                Err(e) => warn!("Encoder {tier} failed: {e}"),
            }
        }

        Err(TranscodeError::StrategyExhausted {
            attempts: StrategyTier::ORDERED.len(),
        })
    }

    /// Computes the parameters a tier would configure.
    ///
    /// # Errors
    /// - `CodecError::NoCodec` - Capability-checked tier found no encoder
    /// - `CodecError::Platform` - Codec list query failed
    pub fn plan(
        &self,
        tier: StrategyTier,
        requested: &EncoderParams,
    ) -> Result<TierPlan, CodecError> {
        let limits = self.limits;
        let half_bit_rate = (requested.bit_rate / 2).max(1);

        let plan = match tier {
            StrategyTier::CapabilityChecked => {
                let encoder = self.prober.preferred_encoder(requested.codec)?;
                let caps = &encoder.capabilities;

                let safe = clamp_to_bounds(
                    requested.dimensions,
                    limits.safe_long_edge,
                    limits.safe_short_edge,
                );
                let dimensions = if caps.max_width > 0 && caps.max_height > 0 {
                    clamp_to_bounds(safe, caps.max_width, caps.max_height)
                } else {
                    safe
                };

                TierPlan {
                    tier,
                    params: EncoderParams {
                        codec: requested.codec,
                        dimensions,
                        bit_rate: bounded(
                            requested.bit_rate,
                            limits.safe_bit_rate,
                            caps.max_bit_rate,
                        ),
                        frame_rate: bounded(
                            requested.frame_rate,
                            limits.safe_frame_rate,
                            caps.max_frame_rate,
                        ),
                    },
                    capabilities: Some(encoder.capabilities.clone()),
                    encoder_name: Some(encoder.name),
                }
            }
            StrategyTier::Basic => self.default_plan(tier, *requested),
            StrategyTier::HalfBitrate => self.default_plan(
                tier,
                EncoderParams {
                    bit_rate: half_bit_rate,
                    ..*requested
                },
            ),
            StrategyTier::HalfBitrateAligned => self.default_plan(
                tier,
                EncoderParams {
                    bit_rate: half_bit_rate,
                    dimensions: align_down(requested.dimensions, limits.alignment),
                    ..*requested
                },
            ),
            StrategyTier::Conservative => self.default_plan(
                tier,
                EncoderParams {
                    codec: VideoCodec::H264,
                    dimensions: clamp_to_bounds(
                        requested.dimensions,
                        limits.conservative_long_edge,
                        limits.conservative_short_edge,
                    ),
                    bit_rate: requested.bit_rate.min(limits.conservative_bit_rate),
                    frame_rate: requested.frame_rate.min(limits.conservative_frame_rate),
                },
            ),
            StrategyTier::Baseline => self.default_plan(
                tier,
                EncoderParams {
                    codec: VideoCodec::H264,
                    dimensions: requested.dimensions.orient(Dimensions::new(
                        limits.baseline_width,
                        limits.baseline_height,
                    )),
                    bit_rate: limits.baseline_bit_rate,
                    frame_rate: limits.baseline_frame_rate,
                },
            ),
        };
        Ok(plan)
    }

    fn default_plan(&self, tier: StrategyTier, params: EncoderParams) -> TierPlan {
        TierPlan {
            tier,
            encoder_name: None,
            params,
            capabilities: None,
        }
    }

    /// Runs one tier: configure with the transfer colour format and the short
    /// keyframe interval, and on a configuration error retry once on a fresh
    /// codec without a colour format and with the long interval.
    fn attempt(
        &self,
        plan: &TierPlan,
        options: &EncoderOptions,
    ) -> Result<ConfiguredEncoder, CodecError> {
        let first_format = self.transfer_color_format(plan, options.mode);
        let first = self.configure_once(
            plan,
            options,
            Some(first_format),
            self.limits.key_frame_interval_secs,
        );

        match first {
            Err(e) if e.is_configuration() => {
                debug!(
                    "{} rejected {first_format} with {} s keyframes, retrying: {e}",
                    plan.tier, self.limits.key_frame_interval_secs
                );
                self.configure_once(
                    plan,
                    options,
                    None,
                    self.limits.fallback_key_frame_interval_secs,
                )
            }
            other => other,
        }
    }

    fn configure_once(
        &self,
        plan: &TierPlan,
        options: &EncoderOptions,
        color_format: Option<ColorFormat>,
        key_frame_interval_secs: u32,
    ) -> Result<ConfiguredEncoder, CodecError> {
        let mut codec = match &plan.encoder_name {
            Some(name) => self.platform.create_codec_by_name(name)?,
            None => self
                .platform
                .create_encoder_by_type(plan.params.codec.mime())?,
        };

        let mut format = MediaFormat::video(
            plan.params.codec.mime(),
            plan.params.dimensions.width,
            plan.params.dimensions.height,
        )
        .with_bit_rate(plan.params.bit_rate)
        .with_frame_rate(plan.params.frame_rate)
        .with_key_frame_interval(key_frame_interval_secs)
        .with_color_format(color_format);
        format.hdr = options.hdr;
        format.crop = options.crop;

        match start_encoder(codec.as_mut(), &format, options.mode) {
            Ok(surface) => Ok(ConfiguredEncoder {
                codec,
                params: plan.params,
                tier: plan.tier,
                color_format,
                key_frame_interval_secs,
                surface,
            }),
            Err(e) => {
                if let Err(release_error) = codec.release() {
                    debug!("Releasing rejected encoder failed: {release_error}");
                }
                Err(e)
            }
        }
    }

    /// Surface input unless the encoder declares formats without it; buffer
    /// input takes the best declared YUV layout.
    fn transfer_color_format(&self, plan: &TierPlan, mode: TransferMode) -> ColorFormat {
        let caps = plan.capabilities.clone().or_else(|| {
            let name = plan.encoder_name.as_deref()?;
            self.prober.capabilities_of(name)
        });
        match (mode, caps) {
            (TransferMode::Surface, Some(caps)) if !caps.color_formats.is_empty() => {
                select_color_format(&caps)
            }
            (TransferMode::Surface, _) => ColorFormat::Surface,
            (TransferMode::Buffer, caps) => caps
                .as_ref()
                .map(select_buffer_color_format)
                .unwrap_or(DEFAULT_COLOR_FORMAT),
        }
    }
}

/// Configures, creates the input surface on the surface path, and starts.
fn start_encoder(
    codec: &mut dyn Codec,
    format: &MediaFormat,
    mode: TransferMode,
) -> Result<Option<InputSurface>, CodecError> {
    codec.configure(format, None)?;

    let surface = match mode {
        TransferMode::Surface => Some(codec.create_input_surface()?),
        TransferMode::Buffer => None,
    };

    if let Err(e) = codec.start() {
        if let Some(surface) = &surface {
            surface.release();
        }
        return Err(e);
    }
    Ok(surface)
}

/// `requested` capped by a fixed limit and by a declared limit when known.
fn bounded(requested: u32, limit: u32, declared: u32) -> u32 {
    let capped = requested.min(limit);
    if declared > 0 { capped.min(declared) } else { capped }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::MIME_AVC;
    use crate::codec::test_mocks::{MockPlatform, mock_encoder_info};

    const REQUESTED: EncoderParams = EncoderParams {
        codec: VideoCodec::H264,
        dimensions: Dimensions::new(854, 480),
        bit_rate: 4_000_000,
        frame_rate: 30,
    };

    fn run(
        platform: MockPlatform,
        requested: &EncoderParams,
        mode: TransferMode,
    ) -> (Result<ConfiguredEncoder, TranscodeError>, MockPlatform) {
        let platform = Arc::new(platform);
        let prober = CapabilityProber::new(platform.clone(), Dimensions::new(1280, 720));
        let limits = EncoderLimits::default();
        let chain = EncoderStrategyChain::new(platform.as_ref(), &prober, &limits);
        let result = chain.configure(requested, &EncoderOptions::new(mode));
        drop(prober);
        let platform = Arc::try_unwrap(platform).ok().unwrap();
        (result, platform)
    }

    #[test]
    fn test_first_tier_uses_preferred_hardware_encoder() {
        let requested = EncoderParams {
            dimensions: Dimensions::new(3840, 2160),
            bit_rate: 20_000_000,
            frame_rate: 60,
            ..REQUESTED
        };
        let (result, _) = run(MockPlatform::new(), &requested, TransferMode::Surface);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::CapabilityChecked);
        assert_eq!(encoder.codec.name(), "mock.avc.hw");
        assert_eq!(encoder.params.dimensions, Dimensions::new(1920, 1080));
        assert_eq!(encoder.params.bit_rate, 5_000_000);
        assert_eq!(encoder.params.frame_rate, 30);
        assert_eq!(encoder.color_format, Some(ColorFormat::Surface));
        assert_eq!(encoder.key_frame_interval_secs, 1);
        assert!(encoder.surface.is_some());
    }

    #[test]
    fn test_second_tier_uses_requested_parameters_exactly() {
        let platform = MockPlatform::new().with_broken_codec_list();
        let (result, _) = run(platform, &REQUESTED, TransferMode::Buffer);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::Basic);
        assert_eq!(encoder.params, REQUESTED);
        assert_eq!(encoder.color_format, Some(DEFAULT_COLOR_FORMAT));
        assert!(encoder.surface.is_none());
    }

    #[test]
    fn test_nested_retry_drops_color_format_and_lengthens_keyframes() {
        let platform = MockPlatform::new()
            .rejecting(|name, format| name == "mock.avc.hw" || format.color_format.is_some());
        let (result, platform) = run(platform, &REQUESTED, TransferMode::Surface);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::Basic);
        assert_eq!(encoder.color_format, None);
        assert_eq!(encoder.key_frame_interval_secs, 5);

        let configured = platform.log.configured();
        // tier 1 twice, then tier 2 with and without colour format
        assert_eq!(configured.len(), 4);
        assert_eq!(configured[2].1.key_frame_interval_secs, Some(1));
        assert_eq!(configured[3].1.key_frame_interval_secs, Some(5));
        assert_eq!(configured[3].1.color_format, None);
        // every rejected codec was released, the winner was not
        assert_eq!(platform.log.count("encoder.release"), 3);
    }

    #[test]
    fn test_aligned_tier_rounds_to_macroblocks() {
        let platform = MockPlatform::new().rejecting(|name, format| {
            name == "mock.avc.hw" || format.width.unwrap_or(0) % 16 != 0
        });
        let (result, _) = run(platform, &REQUESTED, TransferMode::Buffer);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::HalfBitrateAligned);
        assert_eq!(encoder.params.dimensions, Dimensions::new(848, 480));
        assert_eq!(encoder.params.bit_rate, 2_000_000);
    }

    #[test]
    fn test_conservative_tier_forces_h264() {
        let requested = EncoderParams {
            codec: VideoCodec::Hevc,
            dimensions: Dimensions::new(1920, 1080),
            bit_rate: 8_000_000,
            frame_rate: 60,
        };
        let platform = MockPlatform::new().rejecting(|_, format| format.mime != "video/avc");
        let (result, _) = run(platform, &requested, TransferMode::Buffer);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::Conservative);
        assert_eq!(
            encoder.params,
            EncoderParams {
                codec: VideoCodec::H264,
                dimensions: Dimensions::new(1280, 720),
                bit_rate: 2_000_000,
                frame_rate: 30,
            }
        );
    }

    #[test]
    fn test_baseline_tier_matches_portrait_orientation() {
        let requested = EncoderParams {
            dimensions: Dimensions::new(480, 854),
            ..REQUESTED
        };
        let platform =
            MockPlatform::new().rejecting(|_, format| format.bit_rate.unwrap_or(0) > 1_000_000);
        let (result, _) = run(platform, &requested, TransferMode::Surface);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::Baseline);
        assert_eq!(encoder.params.dimensions, Dimensions::new(480, 640));
        assert_eq!(encoder.params.bit_rate, 1_000_000);
        assert_eq!(encoder.params.frame_rate, 24);
    }

    #[test]
    fn test_baseline_tier_keeps_landscape_orientation() {
        let platform =
            MockPlatform::new().rejecting(|_, format| format.bit_rate.unwrap_or(0) > 1_000_000);
        let (result, _) = run(platform, &REQUESTED, TransferMode::Buffer);
        let encoder = result.unwrap();

        assert_eq!(encoder.tier, StrategyTier::Baseline);
        assert_eq!(encoder.params.dimensions, Dimensions::new(640, 480));
    }

    #[test]
    fn test_surface_color_format_follows_declared_capabilities() {
        let mut listed = mock_encoder_info("mock.avc.hw", MIME_AVC, true);
        listed.capabilities.color_formats =
            vec![ColorFormat::YuvSemiPlanar420, ColorFormat::Surface];
        let (result, _) = run(
            MockPlatform::new().with_codec_infos(vec![listed]),
            &REQUESTED,
            TransferMode::Surface,
        );
        let encoder = result.unwrap();
        assert_eq!(encoder.tier, StrategyTier::CapabilityChecked);
        assert_eq!(encoder.color_format, Some(ColorFormat::Surface));

        let mut no_surface = mock_encoder_info("mock.avc.hw", MIME_AVC, true);
        no_surface.capabilities.color_formats =
            vec![ColorFormat::YuvPlanar420, ColorFormat::YuvSemiPlanar420];
        let (result, platform) = run(
            MockPlatform::new().with_codec_infos(vec![no_surface]),
            &REQUESTED,
            TransferMode::Surface,
        );
        let encoder = result.unwrap();
        assert_eq!(encoder.color_format, Some(ColorFormat::YuvSemiPlanar420));
        assert_eq!(
            platform.log.configured()[0].1.color_format,
            Some(ColorFormat::YuvSemiPlanar420)
        );
    }

    #[test]
    fn test_exhaustion_releases_every_codec() {
        let platform = MockPlatform::new().rejecting(|_, _| true);
        let (result, platform) = run(platform, &REQUESTED, TransferMode::Surface);

        assert!(matches!(
            result,
            Err(TranscodeError::StrategyExhausted { attempts: 6 })
        ));
        assert_eq!(platform.log.count("create.encoder"), 12);
        assert_eq!(platform.log.count("encoder.release"), 12);
    }
}
