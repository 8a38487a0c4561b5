//! Hardware-accelerated transcode pipeline.
//!
//! A conversion is validated, planned from the input's video metadata, then
//! run as a surface transfer attempt with a full buffer transfer retry when
//! the first attempt fails. Encoders come out of a six tier strategy chain.

pub mod audio;
pub mod dimensions;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod prober;
pub mod progress;
pub mod request;
pub mod strategy;
pub mod tracks;
pub mod transcoder;

pub use audio::{AudioCopyReport, AudioPassthrough};
pub use dimensions::{Dimensions, align_down, clamp_to_bounds, resolve_output_dimensions};
pub use error::TranscodeError;
pub use lifecycle::{AttemptResources, TeardownReport};
pub use pipeline::{
    BufferTransfer, CancelFlag, FrameTransfer, LoopPhase, LoopSummary, SurfaceTransfer,
    TransferLoop,
};
pub use prober::{
    CapabilityProber, DEFAULT_COLOR_FORMAT, select_buffer_color_format, select_color_format,
};
pub use progress::{ProgressError, ProgressObserver, ProgressReporter, ProgressStream};
pub use request::{ResolutionClass, TranscodeRequest};
pub use strategy::{
    ConfiguredEncoder, EncoderOptions, EncoderParams, EncoderStrategyChain, StrategyTier,
    TierPlan, TransferMode,
};
pub use tracks::{SelectedTracks, TrackDescriptor, find_audio_track, select_tracks};
pub use transcoder::{ConversionPlan, TranscodeOutcome, Transcoder};
