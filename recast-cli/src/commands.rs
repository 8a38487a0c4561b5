//! CLI command implementations

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use recast_core::codec::{CodecInfo, CodecPlatform, CropRect, VideoCodec};
use recast_core::transcode::request::{
    DEFAULT_BIT_RATE, DEFAULT_FRAME_RATE, DEFAULT_HEIGHT, DEFAULT_WIDTH,
};
use recast_core::transcode::{CapabilityProber, Dimensions, ResolutionClass, TranscodeRequest};
use recast_core::{TranscodeService, TranscoderConfig};
use recast_sim::{MediaFixture, SimulatedPlatform};
use tracing::{debug, warn};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a video into an MP4 at the requested size and rate
    Convert(ConvertArgs),
    /// List the encoders the codec platform reports
    Probe {
        /// Use the simulated codec platform
        #[arg(long)]
        simulate: bool,
        /// Print the encoder table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a simulated input clip for `--simulate` runs
    Fixture {
        /// Path of the clip to write
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 1920)]
        width: u32,
        #[arg(long, default_value_t = 1080)]
        height: u32,
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Clip length in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u32,
        /// Display rotation stored with the video track
        #[arg(long, default_value_t = 0)]
        rotation: u32,
        /// Leave out the audio track
        #[arg(long)]
        no_audio: bool,
        /// Seed for the generated sample payloads
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

/// Arguments of the `convert` command
#[derive(Args)]
pub struct ConvertArgs {
    /// Input video
    #[arg(short, long)]
    pub input: PathBuf,
    /// Output MP4
    #[arg(short, long)]
    pub output: PathBuf,
    /// Output width when no resolution class applies
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    pub width: u32,
    /// Output height when no resolution class applies
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,
    /// Nominal resolution: 480, 720, 1080 or custom
    #[arg(long)]
    pub resolution: Option<ResolutionClass>,
    /// Target bitrate in bits per second
    #[arg(long, default_value_t = DEFAULT_BIT_RATE)]
    pub bitrate: u32,
    /// Target frame rate
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE)]
    pub fps: u32,
    /// Target codec: h264, hevc or av1
    #[arg(long, default_value_t = VideoCodec::H264)]
    pub codec: VideoCodec,
    /// Request HDR output
    #[arg(long)]
    pub hdr: bool,
    /// Crop rectangle as x,y,width,height
    #[arg(long)]
    pub crop: Option<CropRect>,
    /// Use the simulated codec platform
    #[arg(long)]
    pub simulate: bool,
}

impl ConvertArgs {
    fn to_request(&self) -> TranscodeRequest {
        let mut request = TranscodeRequest::new(&self.input, &self.output)
            .with_size(self.width, self.height)
            .with_bitrate(self.bitrate)
            .with_fps(self.fps)
            .with_codec(self.codec)
            .with_hdr(self.hdr);
        if let Some(resolution) = self.resolution {
            request = request.with_resolution(resolution);
        }
        if let Some(crop) = self.crop {
            request = request.with_crop(crop);
        }
        request
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Convert(args) => convert(args).await,
        Commands::Probe { simulate, json } => probe(simulate, json),
        Commands::Fixture {
            output,
            width,
            height,
            fps,
            seconds,
            rotation,
            no_audio,
            seed,
        } => {
            let mut fixture = MediaFixture::new(width, height)
                .frame_rate(fps)
                .duration_secs(seconds)
                .rotation(rotation)
                .seed(seed);
            if no_audio {
                fixture = fixture.without_audio();
            }
            write_fixture(&fixture, output)
        }
    }
}

/// Codec platform for this run.
fn platform(simulate: bool) -> anyhow::Result<Arc<dyn CodecPlatform>> {
    if simulate {
        debug!("Using the simulated codec platform");
        return Ok(Arc::new(SimulatedPlatform::new()));
    }
    native_platform()
}

#[cfg(feature = "ffmpeg")]
fn native_platform() -> anyhow::Result<Arc<dyn CodecPlatform>> {
    let platform = recast_core::codec::ffmpeg::FfmpegPlatform::new()
        .context("initializing FFmpeg")?;
    Ok(Arc::new(platform))
}

#[cfg(not(feature = "ffmpeg"))]
fn native_platform() -> anyhow::Result<Arc<dyn CodecPlatform>> {
    anyhow::bail!(
        "recast was built without a native codec platform; rebuild with `--features ffmpeg` or pass --simulate"
    )
}

/// Runs one conversion, rendering progress on stderr. Ctrl-C cancels it.
///
/// # Errors
/// - Platform initialization failed
/// - The conversion failed; the output file is removed
pub async fn convert(args: ConvertArgs) -> anyhow::Result<()> {
    let service = TranscodeService::new(platform(args.simulate)?, TranscoderConfig::from_env());
    let mut progress = service.subscribe_progress();

    let conversion = service.try_convert(args.to_request());
    tokio::pin!(conversion);

    let result = loop {
        tokio::select! {
            result = &mut conversion => break result,
            Some(fraction) = progress.recv() => render_progress(fraction),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    warn!("Interrupted, cancelling conversion");
                    service.cancel();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
            },
        }
    };
    while let Ok(fraction) = progress.try_recv() {
        render_progress(fraction);
    }
    eprintln!();

    let outcome = result.with_context(|| format!("converting {}", args.input.display()))?;
    eprintln!(
        "Encoded {} {} @ {} bps, {} fps via {} transfer, {} in {:.2?}",
        outcome.encoder.codec,
        outcome.encoder.dimensions,
        outcome.encoder.bit_rate,
        outcome.encoder.frame_rate,
        outcome.transfer_mode,
        outcome.tier,
        outcome.elapsed
    );
    if let Some(audio) = &outcome.audio {
        eprintln!(
            "Audio: {} samples copied{}",
            audio.samples_written,
            if audio.aborted { " (incomplete)" } else { "" }
        );
    }
    println!("{}", outcome.output_path.display());
    Ok(())
}

fn render_progress(fraction: f64) {
    eprint!("\r{:>3.0}%", fraction * 100.0);
    let _ = std::io::stderr().flush();
}

/// Prints every encoder the platform lists.
///
/// # Errors
/// - Platform initialization failed
/// - The platform could not list its codecs
pub fn probe(simulate: bool, json: bool) -> anyhow::Result<()> {
    let config = TranscoderConfig::from_env();
    let probe_size = Dimensions::new(config.pipeline.probe_width, config.pipeline.probe_height);
    let prober = CapabilityProber::new(platform(simulate)?, probe_size);
    let encoders = prober.describe().context("listing encoders")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&encoders)?);
        return Ok(());
    }

    println!("Encoders");
    println!("{:-<60}", "");
    if encoders.is_empty() {
        println!("No encoders reported.");
    }
    for info in &encoders {
        print_encoder(info);
    }
    for codec in [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Av1] {
        println!(
            "{codec}: {}",
            if prober.is_encoder_supported(codec) {
                "supported"
            } else {
                "not supported"
            }
        );
    }
    Ok(())
}

fn print_encoder(info: &CodecInfo) {
    let caps = &info.capabilities;
    println!(
        "{} ({})",
        info.name,
        if info.hardware_accelerated {
            "hardware"
        } else {
            "software"
        }
    );
    println!("  types:   {}", info.supported_types.join(", "));
    println!("  colours: {:?}", caps.color_formats);
    println!(
        "  limits:  {}x{}, {} bps, {} fps",
        caps.max_width, caps.max_height, caps.max_bit_rate, caps.max_frame_rate
    );
}

/// Writes a simulated clip.
///
/// # Errors
/// - The file could not be written
pub fn write_fixture(fixture: &MediaFixture, output: PathBuf) -> anyhow::Result<()> {
    let container = fixture
        .write(&output)
        .with_context(|| format!("writing fixture {}", output.display()))?;

    let samples: usize = container.tracks.iter().map(|t| t.samples.len()).sum();
    println!(
        "Wrote {} ({}x{}, {} fps, {} s, {} tracks, {samples} samples)",
        output.display(),
        fixture.width,
        fixture.height,
        fixture.frame_rate,
        fixture.duration_secs,
        container.tracks.len()
    );
    Ok(())
}
