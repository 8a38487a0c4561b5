//! Shared helpers for the integration tests

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use recast_core::codec::MediaFormat;
use recast_core::transcode::{
    CancelFlag, ProgressError, ProgressObserver, ProgressReporter, TranscodeError,
    TranscodeOutcome, TranscodeRequest, Transcoder,
};
use recast_core::TranscoderConfig;
use recast_sim::{MediaFixture, SimContainer, SimulatedPlatform};
use tempfile::TempDir;

/// Temporary directory holding the inputs and outputs of one test.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `fixture` as `name` and returns its path.
    pub fn fixture(&self, fixture: &MediaFixture, name: &str) -> PathBuf {
        let path = self.path(name);
        fixture.write(&path).unwrap();
        path
    }
}

/// Observer that records every progress event.
#[derive(Default)]
pub struct RecordingObserver {
    values: Mutex<Vec<f64>>,
}

impl RecordingObserver {
    pub fn values(&self) -> Vec<f64> {
        self.values.lock().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, fraction: f64) -> Result<(), ProgressError> {
        self.values.lock().push(fraction);
        Ok(())
    }
}

/// Runs one conversion directly on a transcoder and returns the outcome
/// together with every progress value emitted.
pub fn run_transcode(
    platform: &Arc<SimulatedPlatform>,
    request: &TranscodeRequest,
) -> (Result<TranscodeOutcome, TranscodeError>, Vec<f64>) {
    let transcoder = Transcoder::new(platform.clone(), TranscoderConfig::for_testing());
    let observer = Arc::new(RecordingObserver::default());
    let mut progress = ProgressReporter::new(observer.clone());
    let result = transcoder.transcode(request, &mut progress, &CancelFlag::new());
    (result, observer.values())
}

pub fn assert_progress_complete(values: &[f64]) {
    assert!(!values.is_empty(), "no progress was reported");
    assert!(
        values.windows(2).all(|pair| pair[0] < pair[1]),
        "progress went backwards: {values:?}"
    );
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(values.last().copied(), Some(1.0));
}

pub fn read_output(path: &Path) -> SimContainer {
    assert!(path.exists(), "{} was not written", path.display());
    assert!(std::fs::metadata(path).unwrap().len() > 0);
    SimContainer::read(path).unwrap()
}

pub fn video_size(container: &SimContainer) -> (u32, u32) {
    let video = container.video_track().expect("output has no video track");
    (video.format.width.unwrap(), video.format.height.unwrap())
}

/// Encoder predicate that blocks the first configuration until opened.
///
/// Lets a test observe a conversion while it is guaranteed to be running.
#[derive(Clone, Default)]
pub struct ConfigGate {
    entered: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl ConfigGate {
    pub fn predicate(&self) -> impl Fn(&str, &MediaFormat) -> bool + Send + Sync + 'static {
        let gate = self.clone();
        move |_: &str, _: &MediaFormat| {
            gate.entered.store(true, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(10);
            while !gate.open.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            false
        }
    }

    pub async fn wait_entered(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "conversion never configured an encoder");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}
