//! Ownership and ordered teardown of everything one attempt opens.

use tracing::{debug, warn};

use crate::codec::{Codec, CodecResult, Extractor, InputSurface, Muxer};

/// Outcome of a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Number of release steps executed
    pub attempted: usize,
    /// Steps that failed, as "component: error"
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn step(&mut self, component: &'static str, result: CodecResult<()>) {
        self.attempted += 1;
        if let Err(e) = result {
            warn!("Releasing {component} failed: {e}");
            self.failures.push(format!("{component}: {e}"));
        }
    }
}

/// Handles owned by one transcode attempt.
///
/// Released in the order surface, muxer, encoder, decoder, extractor. Every
/// step runs even when an earlier one fails. Dropping the value releases
/// whatever is still held.
#[derive(Default)]
pub struct AttemptResources {
    pub extractor: Option<Box<dyn Extractor>>,
    pub decoder: Option<Box<dyn Codec>>,
    pub encoder: Option<Box<dyn Codec>>,
    pub muxer: Option<Box<dyn Muxer>>,
    pub surface: Option<InputSurface>,
    /// Set once the muxer accepted `start`; a started muxer is stopped before release
    pub muxer_started: bool,
}

impl AttemptResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.extractor.is_none()
            && self.decoder.is_none()
            && self.encoder.is_none()
            && self.muxer.is_none()
            && self.surface.is_none()
    }

    /// Releases every held handle.
    pub fn release_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(surface) = self.surface.take() {
            surface.release();
            report.step("surface", Ok(()));
        }

        if let Some(mut muxer) = self.muxer.take() {
            if std::mem::take(&mut self.muxer_started) {
                report.step("muxer stop", muxer.stop());
            }
            report.step("muxer", muxer.release());
        }

        if let Some(mut encoder) = self.encoder.take() {
            if encoder.state().is_running() {
                report.step("encoder stop", encoder.stop());
            }
            report.step("encoder", encoder.release());
        }

        if let Some(mut decoder) = self.decoder.take() {
            if decoder.state().is_running() {
                report.step("decoder stop", decoder.stop());
            }
            report.step("decoder", decoder.release());
        }

        if let Some(mut extractor) = self.extractor.take() {
            report.step("extractor", extractor.release());
        }

        debug!(
            "Teardown finished: {} steps, {} failures",
            report.attempted,
            report.failures.len()
        );
        report
    }
}

impl Drop for AttemptResources {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.release_all();
        }
    }
}
