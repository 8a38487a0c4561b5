//! Recast Simulation - deterministic codec platform for testing transcodes.

#![warn(clippy::missing_errors_doc)]
//!
//! Stands in for a device codec subsystem so the whole pipeline can run
//! without hardware or media libraries. Inputs are JSON containers written by
//! `MediaFixture`; sample payloads are generated from seeds, so the same
//! fixture always produces the same transcode.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use recast_core::{TranscodeRequest, Transcoder, TranscoderConfig};
//! use recast_core::transcode::{CancelFlag, ProgressReporter};
//! use recast_sim::{MediaFixture, SimulatedPlatform};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! MediaFixture::new(1920, 1080).write("clip.json".as_ref())?;
//!
//! let platform = Arc::new(SimulatedPlatform::builder().without_surface_support().build());
//! let transcoder = Transcoder::new(platform, TranscoderConfig::default());
//! let request = TranscodeRequest::new("clip.json", "out.json");
//! let outcome = transcoder.transcode(
//!     &request,
//!     &mut ProgressReporter::disabled(),
//!     &CancelFlag::new(),
//! )?;
//! println!("Encoded with {} via {}", outcome.tier, outcome.transfer_mode);
//! # Ok(())
//! # }
//! ```
//!
//! Fault injection hooks on `SimulatedPlatformBuilder` cover the failure
//! paths the pipeline recovers from: missing surface support, rejected
//! encoder configurations, mid-stream render failures, an unreadable codec
//! list and failing audio writes.

pub mod codec;
pub mod container;
pub mod extractor;
pub mod fixture;
pub mod muxer;
pub mod platform;

pub use codec::{SimCodec, SimPicture};
pub use container::{SIM_CONTAINER_MAGIC, SimContainer, SimSample, SimTrack, content_hash};
pub use extractor::SimExtractor;
pub use fixture::MediaFixture;
pub use muxer::SimMuxer;
pub use platform::{
    ConfigPredicate, SimStats, SimStatsSnapshot, SimulatedPlatform, SimulatedPlatformBuilder,
};

/// Errors raised while reading or writing simulated media files.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid simulated container: {reason}")]
    InvalidContainer { reason: String },
}

impl From<SimulationError> for recast_core::CodecError {
    fn from(error: SimulationError) -> Self {
        match error {
            SimulationError::Io(e) => recast_core::CodecError::Io(e),
            SimulationError::InvalidContainer { reason } => {
                recast_core::CodecError::Container { reason }
            }
        }
    }
}
