//! End-to-end conversions over the surface pipeline

use std::sync::Arc;

use recast_core::codec::{MIME_AVC, MIME_HEVC, VideoCodec};
use recast_core::transcode::{ResolutionClass, StrategyTier, TranscodeRequest, TransferMode};
use recast_sim::{MediaFixture, SimulatedPlatform};

use crate::common::{Workspace, assert_progress_complete, read_output, run_transcode, video_size};

#[test]
fn test_landscape_1080p_to_480() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1920, 1080), "landscape.json");
    let output = workspace.path("landscape-480.mp4");
    let platform = Arc::new(SimulatedPlatform::new());

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P480);
    let (result, progress) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.output_path, output);
    assert_eq!(outcome.transfer_mode, TransferMode::Surface);
    assert_eq!(outcome.tier, StrategyTier::CapabilityChecked);
    assert_eq!(outcome.encoder.codec, VideoCodec::H264);
    assert_eq!(outcome.video_samples_written, 300);

    let container = read_output(&output);
    assert_eq!(video_size(&container), (854, 480));
    assert_eq!(container.video_track().unwrap().format.mime, MIME_AVC);
    assert_eq!(container.video_track().unwrap().samples.len(), 300);
    assert!(container.video_track().unwrap().samples[0].flags.is_key_frame());

    let audio = container.audio_track().expect("audio was not copied");
    assert!(!audio.samples.is_empty());
    let report = outcome.audio.unwrap();
    assert!(!report.aborted);
    assert_eq!(report.samples_written, audio.samples.len() as u64);

    assert_progress_complete(&progress);
    assert_eq!(progress.first().copied(), Some(0.0));
    assert_eq!(platform.stats().live_codecs(), 0);
}

#[test]
fn test_portrait_1080p_to_480() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1080, 1920), "portrait.json");
    let output = workspace.path("portrait-480.mp4");
    let platform = Arc::new(SimulatedPlatform::new());

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P480);
    let (result, progress) = run_transcode(&platform, &request);
    result.unwrap();

    let container = read_output(&output);
    assert_eq!(video_size(&container), (480, 854));
    assert!(!container.audio_track().unwrap().samples.is_empty());
    assert_progress_complete(&progress);
}

#[test]
fn test_rotation_is_kept_as_orientation_hint() {
    let workspace = Workspace::new();
    let input = workspace.fixture(
        &MediaFixture::new(1920, 1080).duration_secs(2).rotation(90),
        "rotated.json",
    );
    let output = workspace.path("rotated.mp4");
    let platform = Arc::new(SimulatedPlatform::new());

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P720);
    let (result, _) = run_transcode(&platform, &request);
    result.unwrap();

    let container = read_output(&output);
    assert_eq!(video_size(&container), (1280, 720));
    assert_eq!(container.orientation_hint, 90);
}

#[test]
fn test_explicit_size_without_resolution_class() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1920, 1080).duration_secs(2), "in.json");
    let output = workspace.path("custom.mp4");
    let platform = Arc::new(SimulatedPlatform::new());

    let request = TranscodeRequest::new(&input, &output)
        .with_resolution(ResolutionClass::Custom)
        .with_size(960, 540)
        .with_bitrate(1_500_000)
        .with_fps(24);
    let (result, _) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.encoder.bit_rate, 1_500_000);
    assert_eq!(outcome.encoder.frame_rate, 24);
    assert_eq!(video_size(&read_output(&output)), (960, 540));
}

#[test]
fn test_silent_input_produces_video_only_output() {
    let workspace = Workspace::new();
    let input = workspace.fixture(
        &MediaFixture::new(1280, 720).duration_secs(2).without_audio(),
        "silent.json",
    );
    let output = workspace.path("silent.mp4");
    let platform = Arc::new(SimulatedPlatform::new());

    let (result, _) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));
    let outcome = result.unwrap();

    assert!(outcome.audio.is_none());
    let container = read_output(&output);
    assert_eq!(container.tracks.len(), 1);
    assert!(container.audio_track().is_none());
}

#[test]
fn test_codec_selection() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1280, 720).duration_secs(1), "in.json");
    let platform = Arc::new(SimulatedPlatform::new());

    let hevc_out = workspace.path("hevc.mp4");
    let request = TranscodeRequest::new(&input, &hevc_out).with_codec(VideoCodec::Hevc);
    let (result, _) = run_transcode(&platform, &request);
    assert_eq!(result.unwrap().encoder.codec, VideoCodec::Hevc);
    assert_eq!(
        read_output(&hevc_out).video_track().unwrap().format.mime,
        MIME_HEVC
    );

    // The simulated device has no AV1 encoder
    let av1_out = workspace.path("av1.mp4");
    let request = TranscodeRequest::new(&input, &av1_out).with_codec(VideoCodec::Av1);
    let (result, _) = run_transcode(&platform, &request);
    assert_eq!(result.unwrap().encoder.codec, VideoCodec::H264);
}
