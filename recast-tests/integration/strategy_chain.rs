//! Encoder strategy chain against device-side rejections

use std::sync::Arc;

use recast_core::codec::VideoCodec;
use recast_core::transcode::{
    Dimensions, EncoderParams, ResolutionClass, StrategyTier, TranscodeRequest, TransferMode,
};
use recast_sim::{MediaFixture, SimulatedPlatform};

use crate::common::{Workspace, read_output, run_transcode, video_size};

fn clip(workspace: &Workspace) -> std::path::PathBuf {
    workspace.fixture(
        &MediaFixture::new(1920, 1080).duration_secs(1).without_audio(),
        "in.json",
    )
}

#[test]
fn test_unlisted_encoders_fall_through_to_requested_parameters() {
    let workspace = Workspace::new();
    let input = clip(&workspace);
    let output = workspace.path("basic.mp4");
    let platform = Arc::new(SimulatedPlatform::builder().without_encoder_listing().build());

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P480);
    let (result, _) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.tier, StrategyTier::Basic);
    assert_eq!(
        outcome.encoder,
        EncoderParams {
            codec: VideoCodec::H264,
            dimensions: Dimensions::new(854, 480),
            bit_rate: 4_000_000,
            frame_rate: 30,
        }
    );
    assert_eq!(video_size(&read_output(&output)), (854, 480));
}

#[test]
fn test_high_bitrate_rejection_lands_on_half_bitrate() {
    let workspace = Workspace::new();
    let input = clip(&workspace);
    let output = workspace.path("half.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .reject_encoder_config(|_, format| format.bit_rate.unwrap_or(0) > 3_000_000)
            .build(),
    );

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P720);
    let (result, _) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.tier, StrategyTier::HalfBitrate);
    assert_eq!(outcome.encoder.bit_rate, 2_000_000);
    assert_eq!(outcome.encoder.dimensions, Dimensions::new(1280, 720));
}

#[test]
fn test_unaligned_rejection_lands_on_aligned_tier() {
    let workspace = Workspace::new();
    let input = clip(&workspace);
    let output = workspace.path("aligned.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .reject_encoder_config(|_, format| {
                format.width.unwrap_or(0) % 16 != 0 || format.height.unwrap_or(0) % 16 != 0
            })
            .build(),
    );

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P480);
    let (result, _) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.tier, StrategyTier::HalfBitrateAligned);
    assert_eq!(outcome.encoder.dimensions, Dimensions::new(848, 480));
    assert_eq!(outcome.encoder.bit_rate, 2_000_000);
    assert_eq!(video_size(&read_output(&output)), (848, 480));
}

#[test]
fn test_only_baseline_is_accepted() {
    let workspace = Workspace::new();
    let input = clip(&workspace);
    let output = workspace.path("baseline.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .reject_encoder_config(|_, format| format.frame_rate != Some(24))
            .build(),
    );

    let (result, _) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));
    let outcome = result.unwrap();

    assert_eq!(outcome.tier, StrategyTier::Baseline);
    assert_eq!(
        outcome.encoder,
        EncoderParams {
            codec: VideoCodec::H264,
            dimensions: Dimensions::new(640, 480),
            bit_rate: 1_000_000,
            frame_rate: 24,
        }
    );
}

#[test]
fn test_colour_format_rejection_uses_nested_retry() {
    let workspace = Workspace::new();
    let input = clip(&workspace);
    let output = workspace.path("retry.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .reject_encoder_config(|_, format| format.color_format.is_some())
            .build(),
    );

    let (result, _) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));
    let outcome = result.unwrap();

    // The surface trial always names a colour format, so surface is off
    assert_eq!(outcome.tier, StrategyTier::CapabilityChecked);
    assert_eq!(outcome.transfer_mode, TransferMode::Buffer);
    assert!(platform.stats().encoder_rejections >= 2);
}
