//! Recovery paths: buffer transfer fallback and partial audio

use std::sync::Arc;

use recast_core::transcode::{ResolutionClass, TranscodeRequest, TransferMode};
use recast_sim::{MediaFixture, SimulatedPlatform};

use crate::common::{Workspace, assert_progress_complete, read_output, run_transcode, video_size};

#[test]
fn test_surface_unavailable_uses_buffer_pipeline() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1920, 1080).duration_secs(3), "in.json");
    let output = workspace.path("buffer.mp4");
    let platform = Arc::new(SimulatedPlatform::builder().without_surface_support().build());

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P480);
    let (result, progress) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.transfer_mode, TransferMode::Buffer);
    assert!(outcome.video_samples_written > 0);
    assert_eq!(platform.stats().surfaces_created, 0);

    let container = read_output(&output);
    assert_eq!(video_size(&container), (854, 480));
    assert!(!container.video_track().unwrap().samples.is_empty());
    assert!(!container.audio_track().unwrap().samples.is_empty());
    assert_progress_complete(&progress);
    assert_eq!(platform.stats().live_codecs(), 0);
}

#[test]
fn test_mid_stream_surface_failure_falls_back_to_buffer() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1920, 1080).duration_secs(4), "in.json");
    let output = workspace.path("recovered.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .fail_surface_render_after(45)
            .build(),
    );

    let request =
        TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P720);
    let (result, progress) = run_transcode(&platform, &request);
    let outcome = result.unwrap();

    assert_eq!(outcome.transfer_mode, TransferMode::Buffer);
    assert_progress_complete(&progress);

    let stats = platform.stats();
    // Trial encoder plus one encoder per attempt
    assert!(stats.surfaces_created >= 2);
    assert_eq!(stats.decoders_created, 2);
    assert_eq!(stats.muxers_created, 2);
    assert_eq!(stats.live_codecs(), 0);

    let container = read_output(&output);
    assert_eq!(video_size(&container), (1280, 720));
    assert!(!container.audio_track().unwrap().samples.is_empty());
}

#[test]
fn test_audio_write_failure_keeps_partial_audio() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1280, 720).duration_secs(2), "in.json");
    let output = workspace.path("partial-audio.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .fail_audio_writes_after(10)
            .build(),
    );

    let (result, progress) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));
    let outcome = result.unwrap();

    let report = outcome.audio.unwrap();
    assert!(report.aborted);
    assert_eq!(report.samples_written, 10);

    let container = read_output(&output);
    assert_eq!(container.audio_track().unwrap().samples.len(), 10);
    assert_eq!(container.video_track().unwrap().samples.len(), 60);
    assert_progress_complete(&progress);
}
