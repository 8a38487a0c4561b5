//! Conversion progress: percentage gating and the subscriber stream.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Errors raised by progress observers.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Progress observer unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Receives progress fractions in [0, 1].
pub trait ProgressObserver: Send + Sync {
    /// # Errors
    /// - `ProgressError::Unavailable` - The observer can no longer accept events
    fn on_progress(&self, fraction: f64) -> Result<(), ProgressError>;
}

/// Turns input timestamps into progress events.
///
/// Emits only when the whole percentage increases, so the sequence seen by
/// the observer is strictly increasing until the final 1.0. One reporter is
/// shared by every attempt of a conversion.
pub struct ProgressReporter {
    observer: Option<Arc<dyn ProgressObserver>>,
    duration_us: i64,
    last_percent: i64,
}

impl ProgressReporter {
    pub fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            observer: Some(observer),
            duration_us: 0,
            last_percent: -1,
        }
    }

    /// Reporter that drops every event.
    pub fn disabled() -> Self {
        Self {
            observer: None,
            duration_us: 0,
            last_percent: -1,
        }
    }

    /// Sets the total input duration. Non-positive values disable
    /// position based reporting.
    pub fn set_duration_us(&mut self, duration_us: i64) {
        self.duration_us = duration_us;
    }

    /// Records the timestamp of the sample just fed to the decoder.
    pub fn report_position(&mut self, presentation_time_us: i64) {
        if self.duration_us <= 0 {
            return;
        }

        let fraction = (presentation_time_us as f64 / self.duration_us as f64).clamp(0.0, 1.0);
        let percent = (fraction * 100.0).floor() as i64;
        if percent > self.last_percent {
            self.last_percent = percent;
            self.emit(percent as f64 / 100.0);
        }
    }

    /// Emits the final 1.0.
    pub fn finish(&mut self) {
        self.last_percent = 100;
        self.emit(1.0);
    }

    /// Last whole percentage emitted, `None` before the first event.
    pub fn last_percent(&self) -> Option<u32> {
        u32::try_from(self.last_percent).ok()
    }

    fn emit(&self, fraction: f64) {
        let Some(observer) = &self.observer else {
            return;
        };
        if let Err(e) = observer.on_progress(fraction) {
            warn!("Dropping progress event {fraction:.2}: {e}");
        }
    }
}

/// Progress fan-out to at most one subscriber.
#[derive(Default)]
pub struct ProgressStream {
    sender: Mutex<Option<mpsc::UnboundedSender<f64>>>,
}

impl ProgressStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for future events, replacing any earlier subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<f64> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if self.sender.lock().replace(sender).is_some() {
            debug!("Progress subscriber replaced");
        }
        receiver
    }

    pub fn has_subscriber(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }
}

impl ProgressObserver for ProgressStream {
    fn on_progress(&self, fraction: f64) -> Result<(), ProgressError> {
        let mut guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Ok(());
        };
        if sender.send(fraction).is_err() {
            guard.take();
            return Err(ProgressError::Unavailable {
                reason: "subscriber dropped".to_string(),
            });
        }
        Ok(())
    }
}
