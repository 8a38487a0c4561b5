//! Request/response front end for the transcoder.
//!
//! Admits one conversion at a time, runs it on a blocking worker thread and
//! publishes progress to the current subscriber.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::codec::CodecPlatform;
use crate::config::TranscoderConfig;
use crate::transcode::{
    CancelFlag, ProgressReporter, ProgressStream, TranscodeError, TranscodeOutcome,
    TranscodeRequest, Transcoder,
};

/// Unique identifier for conversion jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ActiveJob {
    id: JobId,
    cancel: CancelFlag,
}

/// Capacity-1 conversion service.
///
/// Concurrent requests are rejected with `TranscodeError::Busy`, never queued.
#[derive(Clone)]
pub struct TranscodeService {
    transcoder: Arc<Transcoder>,
    admission: Arc<Semaphore>,
    progress: Arc<ProgressStream>,
    active: Arc<Mutex<Option<ActiveJob>>>,
}

impl TranscodeService {
    pub fn new(platform: Arc<dyn CodecPlatform>, config: TranscoderConfig) -> Self {
        Self::with_transcoder(Arc::new(Transcoder::new(platform, config)))
    }

    pub fn with_transcoder(transcoder: Arc<Transcoder>) -> Self {
        Self {
            transcoder,
            admission: Arc::new(Semaphore::new(1)),
            progress: Arc::new(ProgressStream::new()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Converts the flat key/value request. Resolves to the output path on
    /// success and `None` on any failure, which is logged.
    pub async fn convert(&self, request: &Map<String, Value>) -> Option<PathBuf> {
        match TranscodeRequest::from_map(request) {
            Ok(request) => self.convert_request(request).await,
            Err(e) => {
                error!("Rejected conversion request: {e}");
                None
            }
        }
    }

    /// Typed form of `convert`.
    pub async fn convert_request(&self, request: TranscodeRequest) -> Option<PathBuf> {
        match self.try_convert(request).await {
            Ok(outcome) => Some(outcome.output_path),
            Err(e) => {
                error!("Conversion failed: {}", error_chain(&e));
                None
            }
        }
    }

    /// Runs a conversion and returns the full outcome.
    ///
    /// # Errors
    /// - `TranscodeError::Busy` - Another conversion is running
    /// - `TranscodeError::Worker` - The worker thread panicked or was cancelled
    /// - Any error from `Transcoder::transcode`
    pub async fn try_convert(
        &self,
        request: TranscodeRequest,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let permit = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| TranscodeError::Busy)?;

        let job = JobId::new();
        let cancel = CancelFlag::new();
        *self.active.lock() = Some(ActiveJob {
            id: job,
            cancel: cancel.clone(),
        });

        let transcoder = Arc::clone(&self.transcoder);
        let progress = Arc::clone(&self.progress);
        let active = Arc::clone(&self.active);

        info!(
            "Job {job}: {} -> {}",
            request.input_path.display(),
            request.output_path.display()
        );
        let worker = tokio::task::spawn_blocking(move || {
            let _span = info_span!("transcode", %job).entered();
            let mut reporter = ProgressReporter::new(progress);
            let result = transcoder.transcode(&request, &mut reporter, &cancel);

            // Clear before the permit is returned so the next job's flag is never lost.
            active.lock().take();
            drop(permit);
            result
        });

        match worker.await {
            Ok(result) => result,
            Err(e) => {
                let mut active = self.active.lock();
                if active.as_ref().is_some_and(|current| current.id == job) {
                    active.take();
                }
                Err(TranscodeError::Worker {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Asks the running conversion to stop. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(job) => {
                warn!("Cancelling job {}", job.id);
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.admission.available_permits() == 0
    }

    /// Progress of the running and future conversions, replacing any
    /// earlier subscriber.
    pub fn subscribe_progress(&self) -> mpsc::UnboundedReceiver<f64> {
        self.progress.subscribe()
    }
}

/// Error message followed by every source in the chain.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::CodecError;
    use crate::codec::test_mocks::MockPlatform;

    fn service() -> TranscodeService {
        TranscodeService::new(Arc::new(MockPlatform::new()), TranscoderConfig::for_testing())
    }

    #[tokio::test]
    async fn test_malformed_map_resolves_to_none() {
        let service = service();
        let map = match json!({ "outputPath": "/tmp/out.mp4" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(service.convert(&map).await, None);
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn test_invalid_input_fails_without_codecs() {
        let platform = Arc::new(MockPlatform::new());
        let log = platform.log.clone();
        let service = TranscodeService::new(platform, TranscoderConfig::for_testing());

        let empty = tempfile::NamedTempFile::new().unwrap();
        let request = TranscodeRequest::new(empty.path(), "/tmp/recast-never-written.mp4");

        assert!(matches!(
            service.try_convert(request).await,
            Err(TranscodeError::Validation { .. })
        ));
        assert!(log.events().is_empty());
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn test_second_request_is_rejected_while_busy() {
        let service = service();
        let _held = Arc::clone(&service.admission).try_acquire_owned().unwrap();

        assert!(service.is_busy());
        let request = TranscodeRequest::new("/tmp/in.mp4", "/tmp/out.mp4");
        assert!(matches!(
            service.try_convert(request).await,
            Err(TranscodeError::Busy)
        ));
    }

    #[tokio::test]
    async fn test_cancel_when_idle() {
        assert!(!service().cancel());
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let error = TranscodeError::from(CodecError::from(std::io::Error::other("disk full")));
        assert_eq!(
            error_chain(&error),
            "Codec error: I/O error: disk full: I/O error: disk full: disk full"
        );
    }
}
