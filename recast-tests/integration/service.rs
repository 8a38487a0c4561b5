//! Request service: map requests, progress stream, admission and cancel

use std::sync::Arc;
use std::time::Duration;

use recast_core::transcode::{ResolutionClass, TranscodeError, TranscodeRequest};
use recast_core::{TranscodeService, TranscoderConfig};
use recast_sim::{MediaFixture, SimulatedPlatform};
use serde_json::{Value, json};

use crate::common::{ConfigGate, Workspace, read_output, video_size};

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

#[tokio::test]
async fn test_map_request_resolves_to_output_path() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1920, 1080).duration_secs(2), "in.json");
    let output = workspace.path("out.mp4");
    let service = TranscodeService::new(
        Arc::new(SimulatedPlatform::new()),
        TranscoderConfig::for_testing(),
    );
    let mut progress = service.subscribe_progress();

    let request = object(json!({
        "inputPath": input,
        "outputPath": output,
        "resolution": 480,
        "bitrate": 1_200_000,
        "fps": 30,
        "codec": "h264",
    }));
    let result = service.convert(&request).await;

    assert_eq!(result.as_deref(), Some(output.as_path()));
    assert_eq!(video_size(&read_output(&output)), (854, 480));

    let mut values = Vec::new();
    while let Ok(value) = progress.try_recv() {
        values.push(value);
    }
    assert_eq!(values.last().copied(), Some(1.0));
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(!service.is_busy());
    Ok(())
}

#[tokio::test]
async fn test_failed_conversion_resolves_to_none() {
    let workspace = Workspace::new();
    let input = workspace.path("empty.mp4");
    std::fs::write(&input, b"").unwrap();
    let service = TranscodeService::new(
        Arc::new(SimulatedPlatform::new()),
        TranscoderConfig::for_testing(),
    );

    let request = object(json!({
        "inputPath": input,
        "outputPath": workspace.path("out.mp4"),
    }));
    assert_eq!(service.convert(&request).await, None);

    let malformed = object(json!({ "inputPath": 12 }));
    assert_eq!(service.convert(&malformed).await, None);
}

#[tokio::test]
async fn test_concurrent_request_is_rejected() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1280, 720).duration_secs(1), "in.json");
    let gate = ConfigGate::default();
    let platform = SimulatedPlatform::builder()
        .reject_encoder_config(gate.predicate())
        .build();
    let service = TranscodeService::new(Arc::new(platform), TranscoderConfig::for_testing());

    let first = {
        let service = service.clone();
        let request = TranscodeRequest::new(&input, workspace.path("first.mp4"));
        tokio::spawn(async move { service.try_convert(request).await })
    };
    gate.wait_entered().await;
    assert!(service.is_busy());

    let second = service
        .try_convert(TranscodeRequest::new(&input, workspace.path("second.mp4")))
        .await;
    assert!(matches!(second, Err(TranscodeError::Busy)));
    assert!(!workspace.path("second.mp4").exists());

    gate.open();
    let first = first.await.unwrap();
    assert!(first.is_ok());
    assert!(!service.is_busy());

    // Admission reopens once the first job is done
    let third = service
        .try_convert(TranscodeRequest::new(&input, workspace.path("third.mp4")))
        .await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_cancel_stops_running_conversion() {
    let workspace = Workspace::new();
    let input = workspace.fixture(&MediaFixture::new(1920, 1080).duration_secs(5), "in.json");
    let output = workspace.path("cancelled.mp4");
    let gate = ConfigGate::default();
    let platform = Arc::new(
        SimulatedPlatform::builder()
            .reject_encoder_config(gate.predicate())
            .build(),
    );
    let service = TranscodeService::new(platform.clone(), TranscoderConfig::for_testing());

    let job = {
        let service = service.clone();
        let request = TranscodeRequest::new(&input, &output).with_resolution(ResolutionClass::P480);
        tokio::spawn(async move { service.try_convert(request).await })
    };
    gate.wait_entered().await;

    assert!(service.cancel());
    gate.open();

    let result = tokio::time::timeout(Duration::from_secs(30), job)
        .await
        .expect("cancelled conversion did not finish")
        .unwrap();
    assert!(matches!(result, Err(TranscodeError::Cancelled)));
    assert!(!output.exists());
    assert!(!service.is_busy());
    assert!(!service.cancel());
    assert_eq!(platform.stats().live_codecs(), 0);
}
