//! Conversions that must fail, and what they leave behind

use std::sync::Arc;

use recast_core::codec::{CodecError, MIME_AAC, MediaFormat, SampleFlags};
use recast_core::transcode::{CancelFlag, ProgressReporter, TranscodeError, TranscodeRequest};
use recast_core::{Transcoder, TranscoderConfig};
use recast_sim::{MediaFixture, SimContainer, SimSample, SimTrack, SimulatedPlatform};

use crate::common::{Workspace, run_transcode};

#[test]
fn test_zero_byte_input_fails_before_any_codec() {
    let workspace = Workspace::new();
    let input = workspace.path("empty.mp4");
    std::fs::write(&input, b"").unwrap();
    let output = workspace.path("out.mp4");
    let platform = Arc::new(SimulatedPlatform::new());

    let (result, progress) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));

    assert!(matches!(result, Err(TranscodeError::Validation { .. })));
    let stats = platform.stats();
    assert_eq!(stats.codecs_created(), 0);
    assert_eq!(stats.extractors_opened, 0);
    assert_eq!(stats.muxers_created, 0);
    assert!(progress.is_empty());
    assert!(!output.exists());
}

#[test]
fn test_missing_input_is_a_validation_error() {
    let workspace = Workspace::new();
    let platform = Arc::new(SimulatedPlatform::new());
    let request = TranscodeRequest::new(workspace.path("missing.mp4"), workspace.path("out.mp4"));

    let (result, _) = run_transcode(&platform, &request);
    assert!(matches!(result, Err(TranscodeError::Validation { .. })));
    assert_eq!(platform.stats().codecs_created(), 0);
}

#[test]
fn test_invalid_request_parameters() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(640, 480).duration_secs(1), "in.json");
    let platform = Arc::new(SimulatedPlatform::new());

    for request in [
        TranscodeRequest::new(&input, workspace.path("a.mp4")).with_size(641, 480),
        TranscodeRequest::new(&input, workspace.path("b.mp4")).with_bitrate(0),
        TranscodeRequest::new(&input, workspace.path("c.mp4")).with_fps(0),
    ] {
        let (result, _) = run_transcode(&platform, &request);
        assert!(
            matches!(result, Err(TranscodeError::Validation { .. })),
            "{request:?} was accepted"
        );
    }
    assert_eq!(platform.stats().codecs_created(), 0);
}

#[test]
fn test_unreadable_container_fails_without_codecs() {
    let workspace = Workspace::new();
    let input = workspace.path("garbage.mp4");
    std::fs::write(&input, b"definitely not a container").unwrap();
    let platform = Arc::new(SimulatedPlatform::new());

    let (result, _) =
        run_transcode(&platform, &TranscodeRequest::new(&input, workspace.path("out.mp4")));

    assert!(matches!(
        result,
        Err(TranscodeError::Codec(CodecError::Container { .. }))
    ));
    assert_eq!(platform.stats().codecs_created(), 0);
}

#[test]
fn test_audio_only_input_has_no_video_track() {
    let workspace = Workspace::new();
    let input = workspace.path("audio-only.json");
    let mut track = SimTrack::new(MediaFormat::audio(MIME_AAC, 44_100, 2).with_duration_us(1_000_000));
    track.samples.push(SimSample {
        presentation_time_us: 0,
        flags: SampleFlags::KEY_FRAME,
        size: 200,
        content: 1,
    });
    SimContainer {
        tracks: vec![track],
        ..Default::default()
    }
    .write(&input)
    .unwrap();

    let platform = Arc::new(SimulatedPlatform::new());
    let output = workspace.path("out.mp4");
    let (result, _) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));

    assert!(matches!(result, Err(TranscodeError::NoVideoTrack)));
    assert_eq!(platform.stats().codecs_created(), 0);
    assert!(!output.exists());
}

#[test]
fn test_exhausted_chain_removes_output_and_releases_codecs() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1280, 720).duration_secs(1), "in.json");
    let output = workspace.path("out.mp4");
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .reject_encoder_config(|_, _| true)
            .build(),
    );

    let (result, progress) = run_transcode(&platform, &TranscodeRequest::new(&input, &output));

    assert!(matches!(
        result,
        Err(TranscodeError::StrategyExhausted { attempts: 6 })
    ));
    assert!(!output.exists());
    assert!(progress.is_empty());

    let stats = platform.stats();
    assert_eq!(stats.live_codecs(), 0);
    assert_eq!(stats.muxers_created, 0);
    // Every tier configures twice; the surface trial is rejected first
    assert!(stats.encoder_rejections >= 12);
}

#[test]
fn test_cancelled_before_start() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1280, 720).duration_secs(1), "in.json");
    let output = workspace.path("out.mp4");
    let platform = Arc::new(SimulatedPlatform::new());
    let transcoder = Transcoder::new(platform.clone(), TranscoderConfig::for_testing());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = transcoder.transcode(
        &TranscodeRequest::new(&input, &output),
        &mut ProgressReporter::disabled(),
        &cancel,
    );

    assert!(matches!(result, Err(TranscodeError::Cancelled)));
    assert_eq!(platform.stats().codecs_created(), 0);
    assert!(!output.exists());
}
