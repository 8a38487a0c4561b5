//! Conversion orchestration: validation, planning, attempts and fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::audio::{AudioCopyReport, AudioPassthrough};
use super::dimensions::{Dimensions, resolve_output_dimensions};
use super::error::TranscodeError;
use super::lifecycle::AttemptResources;
use super::pipeline::{BufferTransfer, CancelFlag, FrameTransfer, SurfaceTransfer, TransferLoop};
use super::progress::ProgressReporter;
use super::prober::CapabilityProber;
use super::request::TranscodeRequest;
use super::strategy::{
    EncoderOptions, EncoderParams, EncoderStrategyChain, StrategyTier, TransferMode,
};
use super::tracks::{find_audio_track, select_tracks};
use crate::codec::{CodecPlatform, ColorFormat, MediaFormat};
use crate::config::TranscoderConfig;

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutcome {
    pub output_path: PathBuf,
    pub transfer_mode: TransferMode,
    pub tier: StrategyTier,
    /// Parameters the winning encoder was configured with
    pub encoder: EncoderParams,
    pub video_samples_written: u64,
    /// `None` when the input has no audio track
    pub audio: Option<AudioCopyReport>,
    pub elapsed: Duration,
}

/// What the metadata probe learned about the input, and the encoder
/// parameters derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    pub input: Dimensions,
    pub rotation_degrees: u32,
    pub duration_us: i64,
    pub has_audio: bool,
    pub encoder: EncoderParams,
}

struct AttemptOutcome {
    tier: StrategyTier,
    params: EncoderParams,
    samples_written: u64,
    audio: Option<AudioCopyReport>,
}

/// Runs conversions against one codec platform.
pub struct Transcoder {
    platform: Arc<dyn CodecPlatform>,
    prober: CapabilityProber,
    config: TranscoderConfig,
}

impl Transcoder {
    pub fn new(platform: Arc<dyn CodecPlatform>, config: TranscoderConfig) -> Self {
        let probe_size = Dimensions::new(
            config.pipeline.probe_width,
            config.pipeline.probe_height,
        );
        Self {
            prober: CapabilityProber::new(Arc::clone(&platform), probe_size),
            platform,
            config,
        }
    }

    pub fn prober(&self) -> &CapabilityProber {
        &self.prober
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Converts `request.input_path` into `request.output_path`.
    ///
    /// Tries the surface transfer first when the device supports it and
    /// retries once from scratch with buffer transfer on any recoverable
    /// failure. Partial output is removed when the conversion fails.
    ///
    /// # Errors
    /// - `TranscodeError::Validation` - Request rejected before any codec was created
    /// - `TranscodeError::NoVideoTrack` - Input has nothing to transcode
    /// - `TranscodeError::Cancelled` - `cancel` was raised
    /// - Any error of the final attempt
    pub fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &mut ProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let started = Instant::now();
        request.validate()?;

        let result = self
            .plan(request)
            .and_then(|plan| self.run_attempts(request, &plan, progress, cancel));

        match result {
            Ok((mode, attempt)) => {
                progress.finish();
                let outcome = TranscodeOutcome {
                    output_path: request.output_path.clone(),
                    transfer_mode: mode,
                    tier: attempt.tier,
                    encoder: attempt.params,
                    video_samples_written: attempt.samples_written,
                    audio: attempt.audio,
                    elapsed: started.elapsed(),
                };
                info!(
                    "Converted {} via {} transfer, {} in {:.2?}",
                    request.input_path.display(),
                    outcome.transfer_mode,
                    outcome.tier,
                    outcome.elapsed
                );
                Ok(outcome)
            }
            Err(e) => {
                remove_partial_output(&request.output_path);
                Err(e)
            }
        }
    }

    /// Reads the input's video metadata and derives the encoder request.
    ///
    /// # Errors
    /// - `TranscodeError::NoVideoTrack` - Input has no video track
    /// - `TranscodeError::Codec` - Input could not be opened
    pub fn plan(&self, request: &TranscodeRequest) -> Result<ConversionPlan, TranscodeError> {
        let mut extractor = self.platform.open_extractor(&request.input_path)?;
        let tracks = select_tracks(extractor.as_ref());
        if let Err(e) = extractor.release() {
            warn!("Releasing metadata extractor failed: {e}");
        }
        let tracks = tracks?;
        let video = &tracks.video;

        if !self.prober.is_decoder_supported(&video.mime) {
            debug!("No decoder listed for {}, trying the platform default", video.mime);
        }

        let explicit = Dimensions::new(request.width, request.height);
        let input = video.dimensions().unwrap_or(explicit);
        let output = resolve_output_dimensions(input, request.resolution, explicit);
        let codec = self.prober.resolve_codec(request.codec);

        let plan = ConversionPlan {
            input,
            rotation_degrees: video.rotation_degrees,
            duration_us: video.duration_us,
            has_audio: tracks.audio.is_some(),
            encoder: EncoderParams {
                codec,
                dimensions: output,
                bit_rate: request.bitrate,
                frame_rate: request.fps,
            },
        };
        info!(
            "Planned {} ({input}, rotation {}) -> {codec} {output} @ {} bps, {} fps",
            request.input_path.display(),
            plan.rotation_degrees,
            request.bitrate,
            request.fps
        );
        Ok(plan)
    }

    /// Builds and discards a trial encoder with an input surface.
    pub fn is_surface_transfer_available(&self, params: &EncoderParams) -> bool {
        let mut encoder = match self.platform.create_encoder_by_type(params.codec.mime()) {
            Ok(encoder) => encoder,
            Err(e) => {
                debug!("Surface trial could not create an encoder: {e}");
                return false;
            }
        };

        let format = MediaFormat::video(
            params.codec.mime(),
            params.dimensions.width,
            params.dimensions.height,
        )
        .with_bit_rate(params.bit_rate)
        .with_frame_rate(params.frame_rate)
        .with_key_frame_interval(self.config.limits.key_frame_interval_secs)
        .with_color_format(Some(ColorFormat::Surface));

        let available = encoder
            .configure(&format, None)
            .and_then(|()| encoder.create_input_surface())
            .map(|surface| surface.release());
        if let Err(e) = encoder.release() {
            debug!("Releasing surface trial encoder failed: {e}");
        }

        match available {
            Ok(()) => true,
            Err(e) => {
                info!("Surface transfer unavailable: {e}");
                false
            }
        }
    }

    fn run_attempts(
        &self,
        request: &TranscodeRequest,
        plan: &ConversionPlan,
        progress: &mut ProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<(TransferMode, AttemptOutcome), TranscodeError> {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        if self.is_surface_transfer_available(&plan.encoder) {
            match self.run_attempt(request, plan, TransferMode::Surface, progress, cancel) {
                Ok(outcome) => return Ok((TransferMode::Surface, outcome)),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!("Surface transfer failed, retrying with buffer transfer: {e}");
                    remove_partial_output(&request.output_path);
                }
            }
        }

        let outcome = self.run_attempt(request, plan, TransferMode::Buffer, progress, cancel)?;
        Ok((TransferMode::Buffer, outcome))
    }

    /// One end-to-end attempt. Everything it opens is released before it
    /// returns, followed by the settle delay.
    fn run_attempt(
        &self,
        request: &TranscodeRequest,
        plan: &ConversionPlan,
        mode: TransferMode,
        progress: &mut ProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<AttemptOutcome, TranscodeError> {
        info!("Starting {mode} transfer attempt");
        let mut resources = AttemptResources::new();

        let result = self.execute_attempt(&mut resources, request, plan, mode, progress, cancel);
        if let Err(e) = &result {
            warn!("{mode} transfer attempt failed: {e}");
        }

        let report = resources.release_all();
        if !report.is_clean() {
            warn!(
                "Teardown after {mode} attempt had {} failures: {}",
                report.failures.len(),
                report.failures.join("; ")
            );
        }

        let settle = self.config.pipeline.teardown_settle;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        result
    }

    fn execute_attempt(
        &self,
        resources: &mut AttemptResources,
        request: &TranscodeRequest,
        plan: &ConversionPlan,
        mode: TransferMode,
        progress: &mut ProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<AttemptOutcome, TranscodeError> {
        let pipeline = &self.config.pipeline;

        let extractor = resources
            .extractor
            .insert(self.platform.open_extractor(&request.input_path)?);
        let tracks = select_tracks(extractor.as_ref())?;
        extractor.select_track(tracks.video.index)?;
        progress.set_duration_us(tracks.video.duration_us);

        let options = EncoderOptions {
            mode,
            hdr: request.hdr,
            crop: request.crop,
        };
        let chain = EncoderStrategyChain::new(
            self.platform.as_ref(),
            &self.prober,
            &self.config.limits,
        );
        let configured = chain.configure(&plan.encoder, &options)?;
        let tier = configured.tier;
        let params = configured.params;
        resources.surface = configured.surface;
        resources.encoder = Some(configured.codec);

        let decoder = resources
            .decoder
            .insert(self.platform.create_decoder_by_type(&tracks.video.mime)?);
        decoder.configure(&tracks.video.format, resources.surface.as_ref())?;
        decoder.start()?;

        resources.muxer = Some(self.platform.create_muxer(&request.output_path)?);

        let (Some(extractor), Some(decoder), Some(encoder), Some(muxer)) = (
            resources.extractor.as_deref_mut(),
            resources.decoder.as_deref_mut(),
            resources.encoder.as_deref_mut(),
            resources.muxer.as_deref_mut(),
        ) else {
            return Err(TranscodeError::pipeline(
                "setup",
                "attempt resources are incomplete",
            ));
        };

        let mut transfer: Box<dyn FrameTransfer> = match mode {
            TransferMode::Surface => Box::new(SurfaceTransfer::new()),
            TransferMode::Buffer => Box::new(BufferTransfer::new(pipeline.poll_timeout)),
        };
        let summary = TransferLoop {
            extractor,
            decoder,
            encoder,
            muxer,
            muxer_started: &mut resources.muxer_started,
            progress,
            cancel,
            audio: tracks.audio.as_ref(),
            rotation_degrees: plan.rotation_degrees,
            poll_timeout: pipeline.poll_timeout,
            stall_timeout: pipeline.stall_timeout,
        }
        .run(transfer.as_mut())?;

        if summary.samples_written == 0 {
            return Err(TranscodeError::pipeline(
                "mux",
                "encoder produced no video samples",
            ));
        }
        if summary.frames_skipped > 0 {
            warn!(
                "{} of {} decoded frames dropped waiting for encoder input",
                summary.frames_skipped, summary.frames_decoded
            );
        }

        let audio = match (summary.audio_track, resources.muxer.as_deref_mut()) {
            (Some(muxer_track), Some(muxer)) if resources.muxer_started => {
                Some(self.copy_audio(&request.input_path, muxer, muxer_track))
            }
            _ => None,
        };

        // The output is complete only once the muxer stops and releases cleanly.
        if let Some(mut muxer) = resources.muxer.take() {
            let stopped = if std::mem::take(&mut resources.muxer_started) {
                muxer.stop()
            } else {
                Ok(())
            };
            let released = muxer.release();
            stopped?;
            released?;
        }

        Ok(AttemptOutcome {
            tier,
            params,
            samples_written: summary.samples_written,
            audio,
        })
    }

    fn copy_audio(
        &self,
        input: &Path,
        muxer: &mut dyn crate::codec::Muxer,
        muxer_track: usize,
    ) -> AudioCopyReport {
        let aborted = AudioCopyReport {
            aborted: true,
            ..Default::default()
        };

        let mut extractor = match self.platform.open_extractor(input) {
            Ok(extractor) => extractor,
            Err(e) => {
                warn!("Opening audio extractor failed, output has no audio: {e}");
                return aborted;
            }
        };

        let track = match find_audio_track(extractor.as_ref()) {
            Ok(Some(track)) => track,
            Ok(None) | Err(_) => {
                warn!("Audio track vanished from second input handle");
                if let Err(e) = extractor.release() {
                    warn!("Releasing audio extractor failed: {e}");
                }
                return aborted;
            }
        };

        AudioPassthrough::new(self.config.pipeline.audio_buffer_size).copy(
            extractor,
            &track,
            muxer,
            muxer_track,
        )
    }
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {e}", path.display()),
    }
}
